//! Rendering of generation and verification results.
//!
//! Reports are built from structured findings, never by re-parsing error
//! text. The JSON shape is part of the tooling contract: monitoring jobs
//! feed `details.modified_files` and friends straight into alerts.

use crate::cli::OutputFormat;
use crate::verifier::{Finding, VerifyOutcome};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::io;

#[derive(Debug, Serialize)]
pub struct VerificationDetails {
    pub total_files: usize,
    pub verified_files: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modified_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_files: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VerificationReport {
    pub success: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<VerificationDetails>,
}

impl VerificationReport {
    pub fn from_outcome(outcome: &VerifyOutcome) -> Self {
        if outcome.is_clean() {
            return Self {
                success: true,
                timestamp: now(),
                message: Some("All files verified successfully".to_string()),
                error: None,
                details: Some(VerificationDetails {
                    total_files: outcome.total_files,
                    verified_files: outcome.total_files,
                    modified_files: Vec::new(),
                    deleted_files: Vec::new(),
                    added_files: Vec::new(),
                }),
            };
        }

        let mut details = VerificationDetails {
            total_files: outcome.total_files,
            verified_files: 0,
            modified_files: Vec::new(),
            deleted_files: Vec::new(),
            added_files: Vec::new(),
        };

        for finding in &outcome.findings {
            // The Display form carries the legacy tag; strip it so the
            // detail lists hold bare entries like "app.cfg (type
            // file→symlink)".
            let line = finding.to_string();
            match finding {
                Finding::Modified { .. } => details
                    .modified_files
                    .push(strip_tag(&line, "modified: ")),
                Finding::Deleted { .. } => {
                    details.deleted_files.push(strip_tag(&line, "deleted: "))
                }
                Finding::Added { .. } => details.added_files.push(strip_tag(&line, "added: ")),
            }
        }

        Self {
            success: false,
            timestamp: now(),
            message: None,
            error: Some(format!(
                "integrity check failed: {} change(s) detected",
                outcome.findings.len()
            )),
            details: Some(details),
        }
    }

    pub fn from_error(error: &impl std::fmt::Display) -> Self {
        Self {
            success: false,
            timestamp: now(),
            message: None,
            error: Some(error.to_string()),
            details: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerationReport {
    pub success: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationReport {
    pub fn success(file_count: usize, output_path: Option<String>, store_key: Option<String>) -> Self {
        Self {
            success: true,
            timestamp: now(),
            file_count: Some(file_count),
            output_path,
            store_key,
            error: None,
        }
    }

    pub fn from_error(error: &impl std::fmt::Display) -> Self {
        Self {
            success: false,
            timestamp: now(),
            file_count: None,
            output_path: None,
            store_key: None,
            error: Some(error.to_string()),
        }
    }
}

pub fn render_verification(
    report: &VerificationReport,
    format: OutputFormat,
    writer: &mut impl io::Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => render_json(report, writer),
        OutputFormat::Text => {
            if report.success {
                writeln!(writer, "\u{2713} Integrity check passed")?;
                if let Some(details) = &report.details {
                    writeln!(writer, "  Verified {} files", details.verified_files)?;
                }
                return Ok(());
            }

            writeln!(writer, "\u{2717} Integrity check failed")?;
            if let Some(error) = &report.error {
                writeln!(writer, "  Error: {error}")?;
            }

            if let Some(details) = &report.details {
                render_section(writer, "Modified", &details.modified_files)?;
                render_section(writer, "Deleted", &details.deleted_files)?;
                render_section(writer, "Added", &details.added_files)?;
            }
            Ok(())
        }
    }
}

pub fn render_generation(
    report: &GenerationReport,
    format: OutputFormat,
    writer: &mut impl io::Write,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => render_json(report, writer),
        OutputFormat::Text => {
            if report.success {
                writeln!(writer, "\u{2713} Manifest generated successfully")?;
                if let Some(count) = report.file_count {
                    writeln!(writer, "  File Count: {count}")?;
                }
                if let Some(path) = &report.output_path {
                    writeln!(writer, "  Output: {path}")?;
                }
                if let Some(key) = &report.store_key {
                    writeln!(writer, "  Store Key: {key}")?;
                }
            } else {
                writeln!(writer, "\u{2717} Failed to generate manifest")?;
                if let Some(error) = &report.error {
                    writeln!(writer, "  Error: {error}")?;
                }
            }
            Ok(())
        }
    }
}

fn render_json(report: &impl Serialize, writer: &mut impl io::Write) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, report)?;
    writeln!(writer)
}

fn render_section(writer: &mut impl io::Write, label: &str, entries: &[String]) -> io::Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    writeln!(writer)?;
    writeln!(writer, "  {label} files ({}):", entries.len())?;
    for entry in entries {
        writeln!(writer, "    - {entry}")?;
    }
    Ok(())
}

fn strip_tag(line: &str, tag: &str) -> String {
    line.strip_prefix(tag).unwrap_or(line).to_string()
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

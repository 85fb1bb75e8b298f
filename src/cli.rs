//! Command-line interface schema for kekkai.
//!
//! Defines clap structs/enums for global flags and subcommands.
//! Long-form command text is sourced from `help_text`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod help_text;

/// Explicit logging level for CLI output.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Report rendering format.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// File integrity monitor for production deployments
#[derive(Parser, Debug)]
#[command(
    name = "kekkai",
    about,
    long_about = help_text::ROOT_LONG_ABOUT,
    version
)]
pub struct Cli {
    /// Change to directory before operating
    #[arg(short = 'C', value_name = "DIRECTORY", global = true)]
    pub directory: Option<PathBuf>,

    /// Increase verbosity (-v for info, -vv for debug).
    /// Takes precedence over RUST_LOG.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Set log level explicitly (error, warn, info, debug, trace).
    /// Takes precedence over RUST_LOG.
    #[arg(
        long = "log-level",
        value_enum,
        value_name = "LEVEL",
        conflicts_with = "verbose",
        global = true
    )]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a manifest of file hashes
    #[command(long_about = help_text::GENERATE_LONG_ABOUT)]
    Generate {
        /// Target directory to scan
        #[arg(long, value_name = "DIR", default_value = ".")]
        target: PathBuf,

        /// Output file (- for stdout)
        #[arg(long, value_name = "FILE", default_value = "-")]
        output: String,

        /// Exclude pattern, frozen into the manifest (repeatable)
        #[arg(long = "exclude", value_name = "PATTERN")]
        excludes: Vec<String>,

        /// Number of worker threads (0 = one per logical CPU)
        #[arg(long, value_name = "N", default_value_t = 0)]
        workers: usize,

        /// Aggregate read rate limit in bytes per second (0 = no limit)
        #[arg(long, value_name = "BYTES", default_value_t = 0, allow_negative_numbers = true)]
        rate_limit: i64,

        /// Timeout in seconds (0 = no timeout)
        #[arg(long, value_name = "SECONDS", default_value_t = 300)]
        timeout: u64,

        /// Output format for the result report
        #[arg(long, value_enum, value_name = "FORMAT", default_value = "text")]
        format: OutputFormat,

        /// Manifest store directory; writes <base>/<app>/manifest.json
        #[arg(long, value_name = "DIR")]
        store_dir: Option<PathBuf>,

        /// Deployment tier for the store key (production, staging, ...)
        #[arg(long, value_name = "NAME", default_value = "development")]
        base_path: String,

        /// Application name for the store key
        #[arg(long, value_name = "NAME")]
        app_name: Option<String>,
    },

    /// Verify files against a manifest
    #[command(long_about = help_text::VERIFY_LONG_ABOUT)]
    Verify {
        /// Path to the manifest file
        #[arg(long, value_name = "FILE")]
        manifest: Option<PathBuf>,

        /// Target directory to verify
        #[arg(long, value_name = "DIR", default_value = ".")]
        target: PathBuf,

        /// Number of worker threads (0 = one per logical CPU)
        #[arg(long, value_name = "N", default_value_t = 0)]
        workers: usize,

        /// Aggregate read rate limit in bytes per second (0 = no limit)
        #[arg(long, value_name = "BYTES", default_value_t = 0, allow_negative_numbers = true)]
        rate_limit: i64,

        /// Timeout in seconds (0 = no timeout)
        #[arg(long, value_name = "SECONDS", default_value_t = 300)]
        timeout: u64,

        /// Output format for the result report
        #[arg(long, value_enum, value_name = "FORMAT", default_value = "text")]
        format: OutputFormat,

        /// Enable the metadata cache (skips hashing when size, mtime, and
        /// ctime are unchanged)
        #[arg(long)]
        use_cache: bool,

        /// Directory for the cache file (default: system temp directory)
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,

        /// Probability of re-hashing despite a cache hit (0.0-1.0)
        #[arg(long, value_name = "P", default_value_t = 0.1)]
        verify_probability: f64,

        /// Manifest store directory; reads <base>/<app>/manifest.json
        #[arg(long, value_name = "DIR")]
        store_dir: Option<PathBuf>,

        /// Deployment tier for the store key and cache file
        #[arg(long, value_name = "NAME", default_value = "development")]
        base_path: String,

        /// Application name for the store key and cache file
        #[arg(long, value_name = "NAME")]
        app_name: Option<String>,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

mod cache;
mod cancel;
mod cli;
mod hasher;
mod limiter;
mod manifest;
mod pattern;
mod report;
mod storage;
mod verifier;
mod walker;

use anyhow::Context;
use cancel::CancelToken;
use cli::{Cli, Command, LogLevel, OutputFormat};
use hasher::Calculator;
use manifest::Manifest;
use report::{GenerationReport, VerificationReport};
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use storage::{DirStore, ManifestStore};
use tracing::{Event, Level, Subscriber, error, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use verifier::{VerifyOptions, verify_tree};

struct KekkaiExitCode;

impl KekkaiExitCode {
    /// Exit code used when verification reported integrity findings.
    fn integrity_failure() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used for other errors (I/O errors, invalid arguments, etc.).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_level);

    match run(cli) {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err:#}");
            KekkaiExitCode::any_error()
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // -C applies to every subcommand, so resolve it before dispatching.
    if let Some(directory) = &cli.directory {
        std::env::set_current_dir(directory)
            .with_context(|| format!("changing to directory {}", directory.display()))?;
    }

    match cli.command {
        Command::Generate {
            target,
            output,
            excludes,
            workers,
            rate_limit,
            timeout,
            format,
            store_dir,
            base_path,
            app_name,
        } => handle_generate(GenerateParams {
            target,
            output,
            excludes,
            workers,
            rate_limit,
            timeout,
            format,
            store_dir,
            base_path,
            app_name,
        }),
        Command::Verify {
            manifest,
            target,
            workers,
            rate_limit,
            timeout,
            format,
            use_cache,
            cache_dir,
            verify_probability,
            store_dir,
            base_path,
            app_name,
        } => handle_verify(VerifyParams {
            manifest,
            target,
            workers,
            rate_limit,
            timeout,
            format,
            use_cache,
            cache_dir,
            verify_probability,
            store_dir,
            base_path,
            app_name,
        }),
    }
}

struct GenerateParams {
    target: PathBuf,
    output: String,
    excludes: Vec<String>,
    workers: usize,
    rate_limit: i64,
    timeout: u64,
    format: OutputFormat,
    store_dir: Option<PathBuf>,
    base_path: String,
    app_name: Option<String>,
}

fn handle_generate(params: GenerateParams) -> anyhow::Result<ExitCode> {
    if params.store_dir.is_some() && params.app_name.is_none() {
        error!("--app-name must be specified with --store-dir");
        return Ok(KekkaiExitCode::any_error());
    }
    if let Err(e) = check_rate_limit(params.rate_limit) {
        let report = GenerationReport::from_error(&e);
        report::render_generation(&report, params.format, &mut stderr())?;
        return Ok(KekkaiExitCode::any_error());
    }

    let cancel = start_run(params.timeout);

    let mut calculator = Calculator::new(params.workers);
    if params.rate_limit > 0 {
        calculator = calculator.with_rate_limit(params.rate_limit as u64);
    }

    let manifest = match Manifest::generate(&calculator, &params.target, &params.excludes, &cancel)
    {
        Ok(manifest) => manifest,
        Err(e) => {
            let report = GenerationReport::from_error(&e);
            report::render_generation(&report, params.format, &mut stderr())?;
            return Ok(KekkaiExitCode::any_error());
        }
    };

    let mut output_path = None;
    let mut store_key = None;
    let mut manifest_on_stdout = false;

    if let Some(store_dir) = &params.store_dir {
        let store = DirStore::new(store_dir);
        let app_name = params.app_name.as_deref().unwrap_or_default();
        match store.put(&params.base_path, app_name, &manifest) {
            Ok(key) => store_key = Some(key),
            Err(e) => {
                let report = GenerationReport::from_error(&e);
                report::render_generation(&report, params.format, &mut stderr())?;
                return Ok(KekkaiExitCode::any_error());
            }
        }
    } else if params.output == "-" {
        print!("{}", manifest.to_json()?);
        manifest_on_stdout = true;
    } else {
        let path = PathBuf::from(&params.output);
        if let Err(e) = manifest.save(&path) {
            let report = GenerationReport::from_error(&e);
            report::render_generation(&report, params.format, &mut stderr())?;
            return Ok(KekkaiExitCode::any_error());
        }
        output_path = Some(params.output.clone());
    }

    let report = GenerationReport::success(manifest.file_count, output_path, store_key);
    if manifest_on_stdout {
        // Keep stdout clean for piping the manifest itself.
        report::render_generation(&report, params.format, &mut stderr())?;
    } else {
        report::render_generation(&report, params.format, &mut std::io::stdout())?;
    }

    Ok(ExitCode::SUCCESS)
}

struct VerifyParams {
    manifest: Option<PathBuf>,
    target: PathBuf,
    workers: usize,
    rate_limit: i64,
    timeout: u64,
    format: OutputFormat,
    use_cache: bool,
    cache_dir: Option<PathBuf>,
    verify_probability: f64,
    store_dir: Option<PathBuf>,
    base_path: String,
    app_name: Option<String>,
}

fn handle_verify(params: VerifyParams) -> anyhow::Result<ExitCode> {
    if let Err(e) = check_rate_limit(params.rate_limit) {
        let report = VerificationReport::from_error(&e);
        report::render_verification(&report, params.format, &mut stderr())?;
        return Ok(KekkaiExitCode::any_error());
    }

    let manifest = match load_manifest(&params) {
        Ok(manifest) => manifest,
        Err(e) => {
            let report = VerificationReport::from_error(&e);
            report::render_verification(&report, params.format, &mut stderr())?;
            return Ok(KekkaiExitCode::any_error());
        }
    };

    let cancel = start_run(params.timeout);

    let options = VerifyOptions {
        workers: params.workers,
        rate_limit: params.rate_limit as u64,
        use_cache: params.use_cache,
        cache_dir: params.cache_dir.clone(),
        verify_probability: params.verify_probability,
        base_path: params.base_path.clone(),
        app_name: params.app_name.clone().unwrap_or_default(),
    };

    match verify_tree(&manifest, &params.target, &options, &cancel) {
        Ok(outcome) if outcome.is_clean() => {
            let report = VerificationReport::from_outcome(&outcome);
            report::render_verification(&report, params.format, &mut std::io::stdout())?;
            Ok(ExitCode::SUCCESS)
        }
        Ok(outcome) => {
            let report = VerificationReport::from_outcome(&outcome);
            report::render_verification(&report, params.format, &mut stderr())?;
            Ok(KekkaiExitCode::integrity_failure())
        }
        Err(e) => {
            let report = VerificationReport::from_error(&e);
            report::render_verification(&report, params.format, &mut stderr())?;
            Ok(KekkaiExitCode::any_error())
        }
    }
}

fn load_manifest(params: &VerifyParams) -> anyhow::Result<Manifest> {
    if let Some(store_dir) = &params.store_dir {
        let Some(app_name) = &params.app_name else {
            anyhow::bail!("--app-name must be specified with --store-dir");
        };
        let store = DirStore::new(store_dir);
        return Ok(store.get(&params.base_path, app_name)?);
    }

    if let Some(path) = &params.manifest {
        return Ok(Manifest::load(path)?);
    }

    anyhow::bail!("either --manifest or --store-dir must be specified")
}

/// Builds the run's cancellation token: signal handler plus optional
/// deadline.
fn start_run(timeout_secs: u64) -> CancelToken {
    let cancel = CancelToken::new();
    cancel::install_signal_handler(&cancel);
    if timeout_secs > 0 {
        cancel.cancel_after(Duration::from_secs(timeout_secs));
    }
    cancel
}

/// Rejects a negative rate limit and warns when a positive one is too low
/// to be practical.
fn check_rate_limit(rate_limit: i64) -> anyhow::Result<()> {
    if rate_limit < 0 {
        anyhow::bail!("rate-limit cannot be negative");
    }
    if rate_limit > 0 && rate_limit < 1024 {
        warn!("rate-limit {rate_limit} is very low (< 1KB/s), this may be too restrictive");
    }
    Ok(())
}

fn init_tracing(verbose: u8, log_level: Option<LogLevel>) {
    let filter = match (log_level, verbose) {
        (Some(level), _) => EnvFilter::new(match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }),
        (None, 0) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        (None, 1) => EnvFilter::new("info"),
        (None, _) => EnvFilter::new("debug"),
    };

    let fmt_layer = tracing_fmt::layer()
        .event_format(StderrFormat {
            glyphs: stderr().is_terminal(),
        })
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Bare-message stderr format with a short severity prefix on warnings and
/// errors. Glyphs are reserved for interactive terminals; pipes and log
/// collectors get greppable ASCII tags.
struct StderrFormat {
    glyphs: bool,
}

impl StderrFormat {
    fn severity_prefix(&self, level: Level) -> &'static str {
        if level == Level::ERROR {
            if self.glyphs { "✖ " } else { "ERROR: " }
        } else if level == Level::WARN {
            if self.glyphs { "⚠ " } else { "WARN: " }
        } else {
            ""
        }
    }
}

impl<S, N> FormatEvent<S, N> for StderrFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        writer.write_str(self.severity_prefix(*event.metadata().level()))?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

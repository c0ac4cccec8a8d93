use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use weatherload::config::{
    AppConfig, BASE_URL_VAR, FailurePolicy, LOG_FORMAT_VAR, LOG_LEVEL_VAR, LogFormat,
    LoggingConfig, MAX_RETRIES_VAR, TIMEOUT_VAR, layered,
};
use weatherload::{CityOutcome, LoadError, RunReport, telemetry};

/// Append current weather observations for configured cities into a warehouse table
#[derive(Parser, Debug)]
#[command(name = "weatherload")]
#[command(version = weatherload::VERSION)]
#[command(about, long_about = None)]
struct Cli {
    /// City list file (defaults to $GITHUB_WORKSPACE/api_data_load/api_config.yaml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// What to do when a single city fails
    #[arg(long, value_enum, default_value_t = FailurePolicy::Abort)]
    on_city_error: FailurePolicy,

    /// Keep rows in memory instead of writing to the warehouse
    #[arg(long)]
    dry_run: bool,

    /// Weather provider base URL
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Request timeout in seconds, 0 disables it
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Retries for transient weather API failures
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Flags that were given, keyed by the environment variable they shadow
    fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        if let Some(base_url) = &self.base_url {
            overrides.push((BASE_URL_VAR, base_url.clone()));
        }
        if let Some(timeout) = self.timeout_secs {
            overrides.push((TIMEOUT_VAR, timeout.to_string()));
        }
        if let Some(retries) = self.max_retries {
            overrides.push((MAX_RETRIES_VAR, retries.to_string()));
        }
        if let Some(level) = &self.log_level {
            overrides.push((LOG_LEVEL_VAR, level.clone()));
        }
        if let Some(format) = self.log_format {
            overrides.push((LOG_FORMAT_VAR, format.as_str().to_string()));
        }
        overrides
    }
}

fn log_summary(report: &RunReport) {
    for outcome in report.failures() {
        if let CityOutcome::Failed { city, stage, error } = outcome {
            warn!(%city, %stage, "{}", error.user_message());
        }
    }

    if report.is_success() {
        info!(
            cities = report.loaded_count(),
            rows = report.rows_appended,
            "Run completed successfully"
        );
    } else {
        error!(
            loaded = report.loaded_count(),
            failed = report.failures().count(),
            skipped = report.skipped.len(),
            rows = report.rows_appended,
            "Run completed with failures"
        );
    }
}

async fn run<F>(cli: &Cli, lookup: F) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = AppConfig::from_lookup(lookup, cli.config.clone())?;
    config.failure_policy = cli.on_city_error;

    info!(
        version = weatherload::VERSION,
        policy = ?config.failure_policy,
        dry_run = cli.dry_run,
        "Starting weather load"
    );

    let report = weatherload::pipeline::run(&config, cli.dry_run)
        .await
        .context("Weather load failed")?;
    log_summary(&report);
    Ok(report.is_success())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let overrides = cli.overrides();
    let lookup = layered(&overrides, |name| std::env::var(name).ok());

    let logging = match LoggingConfig::from_lookup(&lookup) {
        Ok(logging) => logging,
        Err(e) => {
            eprintln!("Invalid logging configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = telemetry::init_logging(&logging) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(&cli, &lookup).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            match e.downcast_ref::<LoadError>() {
                Some(load_error) => {
                    error!(kind = load_error.kind(), "Error occurred: {e:#}");
                    error!("{}", load_error.user_message());
                }
                None => error!("Error occurred: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

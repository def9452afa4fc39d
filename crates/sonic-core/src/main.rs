//! Sonic CLI
//!
//! Runs the alert monitor against the dashboard database.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sonic::alerting::{classify, EvaluationCycle, LogNotifier, Notifier, TwilioNotifier};
use sonic::config::{AppConfig, ConfigProvider, FileConfigProvider};
use sonic::db::SqliteMetricSource;
use sonic::models::MetricFamily;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Sonic - alert monitor for the Sonic portfolio dashboard
#[derive(Parser)]
#[command(name = "sonic")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "SONIC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alert monitor until Ctrl+C
    Run {
        /// Time between passes (e.g. "60s", "5m"); defaults to system_config.poll_interval
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },

    /// Run a single pass and print its report
    Check {
        /// Log alerts instead of placing calls
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the severity a value classifies to
    Classify {
        /// Metric family (travel_percent, profit, heat_index)
        #[arg(long, value_parser = parse_family)]
        family: MetricFamily,

        /// Metric value
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Print the effective configuration
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn parse_family(s: &str) -> Result<MetricFamily, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        generate_completions(*shell);
        return ExitCode::SUCCESS;
    }

    let path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let provider = match FileConfigProvider::load(path) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match sonic::telemetry::init(&provider.app_config().logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initialising logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Run { interval } => run_monitor(provider, interval).await,
        Commands::Check { dry_run } => run_check(provider, dry_run).await,
        Commands::Classify { family, value } => run_classify(&provider, family, value),
        Commands::Config => show_config(&provider),
        Commands::Completions { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn build_engine(
    provider: Arc<FileConfigProvider>,
    dry_run: bool,
) -> anyhow::Result<EvaluationCycle> {
    let app = provider.app_config();
    let source = SqliteMetricSource::connect(&app.database).await?;
    let notifier = build_notifier(&app, dry_run);

    Ok(EvaluationCycle::new(Arc::new(source), provider, notifier))
}

fn build_notifier(app: &AppConfig, dry_run: bool) -> Arc<dyn Notifier> {
    if dry_run {
        return Arc::new(LogNotifier::new());
    }

    match app.twilio_config.as_ref().map(TwilioNotifier::new) {
        Some(Ok(notifier)) => Arc::new(notifier),
        Some(Err(e)) => {
            warn!(error = %e, "Twilio is not usable, alerts will only be logged");
            Arc::new(LogNotifier::new())
        }
        None => {
            warn!("No twilio_config, alerts will only be logged");
            Arc::new(LogNotifier::new())
        }
    }
}

async fn run_monitor(
    provider: Arc<FileConfigProvider>,
    interval: Option<Duration>,
) -> anyhow::Result<()> {
    let poll_interval = interval.unwrap_or(provider.current().poll_interval);
    let engine = build_engine(provider, false).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, finishing current pass");
                cancel.cancel();
            }
        }
    });

    engine.run_forever(poll_interval, cancel).await;
    Ok(())
}

async fn run_check(provider: Arc<FileConfigProvider>, dry_run: bool) -> anyhow::Result<()> {
    let engine = build_engine(provider, dry_run).await?;
    let report = engine.run_once().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_classify(provider: &FileConfigProvider, family: MetricFamily, value: f64) -> anyhow::Result<()> {
    let settings = provider.current();
    let Some(thresholds) = settings.thresholds(family)? else {
        anyhow::bail!("{family} has no thresholds configured");
    };

    match classify(value, thresholds) {
        Some(severity) => {
            let boundary = thresholds
                .threshold_for(severity)
                .map_or_else(|| "-".to_string(), |b| b.to_string());
            println!("{family} {value} -> {severity} (boundary {boundary})");
        }
        None => println!("{family} is disabled"),
    }

    Ok(())
}

fn show_config(provider: &FileConfigProvider) -> anyhow::Result<()> {
    println!("# {}", provider.path().display());
    println!(
        "{}",
        serde_json::to_string_pretty(&provider.app_config().redacted())?
    );
    Ok(())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "sonic", &mut io::stdout());
}

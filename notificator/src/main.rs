use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use notificator::app::Application;
use notificator::config::AppConfig;
use notificator::logging;
use notificator::scheduler::{ScheduleExpression, WindowJob};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "NOTIFICATOR_CONFIG", default_value = "notificator.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the alert router
    Listen,
    /// Validate the configuration and print the next run of every window job
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::read(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let _log_guard = logging::init_logging(&config.log)?;
    logging::install_panic_hook(config.log.dir.clone());

    config.validate().context("invalid configuration")?;

    match args.command {
        Command::Listen => listen(config).await,
        Command::Check => check(&config),
    }
}

async fn listen(config: AppConfig) -> anyhow::Result<()> {
    let cancel_token = CancellationToken::new();
    let app = Application::build(config, cancel_token.clone()).await?;

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        cancel_token.cancel();
    });

    app.run().await?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT (Ctrl+C) received, initiating graceful shutdown"),
        _ = terminate => info!("SIGTERM received, initiating graceful shutdown"),
    }
}

fn check(config: &AppConfig) -> anyhow::Result<()> {
    let tz = config.timezone()?;
    let now = Utc::now().with_timezone(&tz);

    println!("Configuration OK ({} technicals)", config.technicals.len());
    let jobs = config
        .start
        .iter()
        .enumerate()
        .map(|(index, e)| (WindowJob::Start { index }, e))
        .chain(
            config
                .stop
                .iter()
                .enumerate()
                .map(|(index, e)| (WindowJob::Stop { index }, e)),
        );

    for (job, expression) in jobs {
        let next = ScheduleExpression::parse(expression)?
            .next_after(&now)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!("{:<10} {expression:<24} next run: {next}", job.tag());
    }
    Ok(())
}

//! sayq-d - Text-to-speech job service
//!
//! Reads each file argument (or stdin) as one job, speaks it through the
//! configured filters and backends, and exits when everything has been spoken.
//! With `--serve` it keeps running until Ctrl+C / SIGTERM.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sayq_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use sayq_d::{ServiceConfig, SpeechService};

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Command-line arguments for sayq-d
#[derive(Parser, Debug)]
#[command(name = "sayq-d")]
#[command(about = "Text-to-speech job queue service")]
#[command(version)]
struct Args {
    /// Configuration file (also SAYQ_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Talker for submitted text; default talker if empty
    #[arg(short, long, default_value = "", env = "SAYQ_TALKER")]
    talker: String,

    /// Owner id recorded on submitted jobs
    #[arg(short, long, default_value = "sayq-d")]
    owner: String,

    /// Speak a warning before anything else (repeatable)
    #[arg(short, long)]
    warning: Vec<String>,

    /// Speak a message at the next paragraph boundary (repeatable)
    #[arg(short, long)]
    message: Vec<String>,

    /// Print events as JSON lines on stderr
    #[arg(long)]
    events: bool,

    /// Keep running until interrupted
    #[arg(long)]
    serve: bool,

    /// Text files to speak; stdin if none
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration before logging so the file can set the level
    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR)
        .context("Failed to resolve configuration file")?;
    let config = ServiceConfig::load(config_path.as_deref())
        .context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting sayq-d");
    if let Some(path) = &config_path {
        info!("Configuration file: {}", path.display());
    }

    let service = SpeechService::new(&config).context("Failed to start speech service")?;

    if args.events {
        let mut rx = service.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{}", line),
                        Err(e) => warn!("Could not serialize event: {}", e),
                    },
                    Err(RecvError::Lagged(skipped)) => warn!("Event printer lagged, {} events lost", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    for warning in &args.warning {
        service.enqueue_warning(warning, &args.talker, &args.owner);
    }
    for message in &args.message {
        service.enqueue_message(message, &args.talker, &args.owner);
    }

    for text in read_inputs(&args).await? {
        let job_id = service.jobs().say_async(&text, &args.talker, &args.owner).await;
        info!(job_id, "Queued job");
    }

    if args.serve {
        shutdown_signal().await;
    } else {
        tokio::select! {
            _ = wait_idle(&service) => info!("All jobs spoken"),
            _ = shutdown_signal() => {}
        }
    }

    tokio::task::spawn_blocking(move || service.shutdown())
        .await
        .context("Service shutdown failed")?;

    info!("sayq-d shutdown complete");
    Ok(())
}

/// File contents, or stdin when no files were given and there is nothing else to say
async fn read_inputs(args: &Args) -> Result<Vec<String>> {
    let mut texts = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        texts.push(text);
    }

    let nothing_else = args.warning.is_empty() && args.message.is_empty();
    if args.files.is_empty() && nothing_else && !args.serve {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read stdin")?;
        texts.push(text);
    }
    Ok(texts)
}

async fn wait_idle(service: &SpeechService) {
    let mut interval = tokio::time::interval(IDLE_POLL_INTERVAL);
    loop {
        interval.tick().await;
        if service.is_idle() {
            return;
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

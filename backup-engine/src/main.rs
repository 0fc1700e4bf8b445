//! Backup Engine - Main entry point
//!
//! Reads one JSON request per line from stdin and writes one JSON response
//! per line to stdout. Logs go to stderr.

use anyhow::Result;
use backup_engine::{config::Config, daemon::shutdown::ShutdownCoordinator, utils, BackupEngine, Dispatcher};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Main backup store root (overrides config)
    #[arg(long, value_name = "DIR")]
    main_root: Option<PathBuf>,

    /// Emergency store root (overrides config)
    #[arg(long, value_name = "DIR")]
    emergency_root: Option<PathBuf>,

    /// Versions kept per original path (overrides config)
    #[arg(long)]
    max_versions: Option<usize>,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env_overrides()?;

        if let Some(root) = &self.main_root {
            config.store.main_root = root.clone();
        }
        if let Some(root) = &self.emergency_root {
            config.store.emergency_root = root.clone();
        }
        if let Some(max) = self.max_versions {
            config.retention.max_versions = max;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    utils::logger::init(&config.log.level)?;

    tracing::info!(
        main_root = %config.store.main_root.display(),
        emergency_root = %config.store.emergency_root.display(),
        max_versions = config.retention.max_versions,
        "Starting backup-engine v{}",
        env!("CARGO_PKG_VERSION")
    );

    let dispatcher = Dispatcher::new(BackupEngine::new(config)?);
    let shutdown_coordinator = ShutdownCoordinator::new();

    // Responses are serialized through one writer task
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = response_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                tracing::error!("stdout closed, dropping responses");
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();
    let mut interrupted = false;

    let signal = shutdown_coordinator.wait_for_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => {
                interrupted = true;
                break;
            }
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let dispatcher = dispatcher.clone();
                    let tx = response_tx.clone();
                    in_flight.spawn(async move {
                        let response = dispatcher.dispatch_line(&line).await;
                        let _ = tx.send(response.to_string());
                    });
                }
                Ok(None) => {
                    tracing::info!("stdin closed");
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read request: {}", e);
                    break;
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Request task panicked: {}", e);
                }
            }
        }
    }

    if interrupted {
        shutdown_coordinator.shutdown(dispatcher.tracker()).await;
    }

    // Outstanding calls still deliver their responses
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Request task panicked: {}", e);
        }
    }
    drop(response_tx);
    let _ = writer.await;

    Ok(())
}

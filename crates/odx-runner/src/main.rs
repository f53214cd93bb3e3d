//! # odx-runner
//!
//! Connects the Onederx stream client, authenticates when credentials are
//! configured, subscribes the configured channels and logs everything that
//! arrives. Reconnects with exponential backoff until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! odx-runner config.json --log-level debug
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use odx_core::config::OdxConfig;
use odx_ws::{ConnectionState, Handler, OdxWsClient};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const BACKOFF_MIN: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(30);
/// A connection that stayed up this long resets the backoff.
const STABLE_AFTER: Duration = Duration::from_secs(10);

/// Onederx stream runner.
#[derive(Parser)]
#[command(name = "odx-runner", about = "Onederx WebSocket stream runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output; overrides `log.log_path`.
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration, then logging (the file layer comes from the config)
    let config = odx_core::config::load_config(&cli.config)?;
    let mut meta = config.log.clone().unwrap_or_default();
    if cli.log_dir.is_some() {
        meta.log_path = cli.log_dir.clone();
    }
    meta.module_name.get_or_insert_with(|| config.module_name());
    odx_core::logging::init_logging(&cli.log_level, Some(&meta))?;

    info!(
        "odx-runner starting: config={}, {} subscription(s), private={}",
        cli.config.display(),
        config.subscriptions.len(),
        config.credentials().is_some(),
    );

    // 2. Stream client
    let on_message: Handler = Arc::new(|msg: &Value| debug!("[ws] message: {msg}"));
    let client = OdxWsClient::new(&config, on_message)?;

    // 3. Ctrl+C flips the stop flag; the loop turns it into a shutdown
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            stop_tx.send_replace(true);
        }
    });

    run_forever(&client, &config, stop_rx).await;
    info!("odx-runner stopped");
    Ok(())
}

/// Connect, resubscribe and run until stopped, backing off between failures.
async fn run_forever(client: &OdxWsClient, config: &OdxConfig, mut stop_rx: watch::Receiver<bool>) {
    let mut state_rx = client.watch_state();
    let mut backoff = BACKOFF_MIN;

    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }

        let started = Instant::now();
        let run = client.run();
        tokio::pin!(run);
        let result = loop {
            tokio::select! {
                res = &mut run => break res,
                Ok(()) = stop_rx.changed() => {
                    client.shutdown();
                    break run.await;
                }
                Ok(()) = state_rx.changed() => {
                    if *state_rx.borrow_and_update() != ConnectionState::Connected {
                        continue;
                    }
                    // The server forgets subscriptions with the connection.
                    if let Err(e) = prepare(client, config) {
                        error!("failed to queue startup commands: {e}");
                        client.shutdown();
                        break run.await;
                    }
                }
            }
        };

        match result {
            Ok(()) if *stop_rx.borrow() => return,
            Ok(()) => info!("[ws] connection closed"),
            Err(e) => warn!("[ws] connection ended: {e}"),
        }

        if started.elapsed() >= STABLE_AFTER {
            backoff = BACKOFF_MIN;
        }
        info!("[ws] reconnecting in {backoff:?}");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            Ok(()) = stop_rx.changed() => return,
        }
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
}

/// Queue auth and the configured subscriptions on a fresh connection.
fn prepare(client: &OdxWsClient, config: &OdxConfig) -> Result<(), odx_core::OdxError> {
    if config.credentials().is_some() {
        let id = client.auth()?;
        debug!("auth queued (cl_req_id={id})");
    }
    for sub in &config.subscriptions {
        let channel = sub.channel.clone();
        let handler: Handler = Arc::new(move |msg: &Value| debug!("[{channel}] {msg}"));
        client.subscribe(handler, &sub.channel, sub.params.clone())?;
    }
    Ok(())
}

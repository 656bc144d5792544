//! NetShield Core - Daemon Entry Point
//!
//! Reads JSON-lines commands on stdin and writes responses plus subscribed
//! stream messages on stdout. Logs go to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use netshield::api::rpc;
use netshield::constants;
use netshield::logic::{CaptureConfig, EngineSettings, SessionController};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} Core v{}...", constants::APP_NAME, constants::APP_VERSION);

    let settings = EngineSettings::from_env();
    log::info!(
        "Engine settings: classifier timeout {:?}, queue {}, subscriber backlog {} ({:?})",
        settings.classifier_timeout,
        settings.queue_capacity,
        settings.subscriber_backlog,
        settings.overflow_policy
    );
    let controller = Arc::new(SessionController::with_settings(settings));

    let (response_tx, response_rx) = mpsc::channel::<String>(constants::RESPONSE_QUEUE_LINES);
    let (stream_tx, stream_rx) = mpsc::channel::<String>(constants::STREAM_QUEUE_LINES);
    tokio::spawn(write_lines(response_rx, stream_rx));

    if constants::is_autostart_enabled() {
        autostart(&controller).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reply = rpc::handle_line(&controller, &line).await;
                    if response_tx.send(reply.response.to_line()).await.is_err() {
                        break;
                    }
                    if let Some(subscription) = reply.subscription {
                        tokio::spawn(rpc::forward_stream(subscription, stream_tx.clone()));
                    }
                }
                Ok(None) => {
                    log::info!("Command input closed");
                    break;
                }
                Err(e) => {
                    log::error!("Failed to read command: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
    }

    if let Err(e) = controller.stop().await {
        log::warn!("Shutdown stop failed: {}", e);
    }
    log::info!("{} Core stopped", constants::APP_NAME);
}

async fn autostart(controller: &SessionController) {
    let config = match constants::get_startup_config() {
        Some(raw) => match serde_json::from_str::<CaptureConfig>(&raw) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Invalid startup capture config, autostart skipped: {}", e);
                return;
            }
        },
        None => CaptureConfig::default(),
    };

    match controller.start(config).await {
        Ok(()) => log::info!("Autostarted capture session"),
        Err(e) => log::error!("Autostart failed: {}", e),
    }
}

/// Single writer so lines never interleave; responses go first
async fn write_lines(mut responses: mpsc::Receiver<String>, mut stream: mpsc::Receiver<String>) {
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            biased;
            Some(line) = responses.recv() => line,
            Some(line) = stream.recv() => line,
            else => break,
        };

        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        };
        if let Err(e) = written.await {
            log::error!("Failed to write output: {}", e);
            break;
        }
    }
}

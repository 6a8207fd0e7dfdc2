use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use dam_client::{Config, HttpTransport, UploadEvent, UploadManager};
use dam_client::logging::init_logging;

/// 用法：dam-client [--config <path>] <file>...
fn parse_args() -> anyhow::Result<(Option<PathBuf>, Vec<PathBuf>)> {
    let mut config = None;
    let mut files = Vec::new();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            let path = args.next().context("--config requires a path")?;
            config = Some(PathBuf::from(path));
        } else {
            files.push(PathBuf::from(arg));
        }
    }

    if files.is_empty() {
        bail!("usage: dam-client [--config <path>] <file>...");
    }
    Ok((config, files))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config_path, files) = parse_args()?;
    let config = Config::from_env_and_file(config_path.as_deref()).context("Failed to load config")?;
    if let Err(err) = init_logging(&config.log_level) {
        eprintln!("Failed to initialize logging: {}", err);
    }

    let endpoint = config.upload_endpoint(None)?;
    let transport = HttpTransport::new(endpoint.as_str(), config.transport_config())?;
    let handle = UploadManager::new(Arc::new(transport), config.upload_config());
    let manager = handle.manager.clone();
    let mut events = manager.subscribe_events();

    let mut pending = 0usize;
    for file in &files {
        match manager.enqueue_path(file, HashMap::new()).await {
            Ok(upload_id) => {
                info!(%upload_id, file = %file.display(), "queued");
                pending += 1;
            }
            Err(err) => error!(file = %file.display(), "{}", err),
        }
    }

    while pending > 0 {
        match events.recv().await {
            Ok(UploadEvent::Progress(progress)) => {
                info!(
                    file = %progress.file_name,
                    percent = (progress.progress_ratio * 1000.0).round() / 10.0,
                    speed = %progress.speed_text,
                    eta = %progress.eta_text,
                    "uploading"
                );
            }
            Ok(UploadEvent::Completed { upload_id, remote }) => {
                info!(%upload_id, remote = remote.as_deref().unwrap_or("-"), "completed");
                pending -= 1;
            }
            Ok(UploadEvent::Failed { upload_id, error }) => {
                error!(%upload_id, code = error.code.as_deref().unwrap_or("-"), "{}", error.message);
                pending -= 1;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event receiver lagged");
                let tasks = manager.get_all_tasks().await?;
                pending = tasks.iter().filter(|task| !task.is_terminal()).count();
            }
            Err(RecvError::Closed) => break,
        }
    }

    drop(manager);
    handle.shutdown().await?;
    Ok(())
}

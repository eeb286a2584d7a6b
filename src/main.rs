mod cli;

use std::time::Duration;

use clap::Parser;
use memesense::config::LoggingSettings;
use memesense::{
    AppError, ImageFile, IngestOutcome, SessionBuilder, SessionHandle, Settings, StartOutcome,
    ViewState,
};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{info, warn, Level};

use crate::cli::Cli;

fn init_logging(settings: &LoggingSettings) {
    let level = settings.level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_logging(&settings.logging);

    let cancel_after = cli.cancel_after_ms.map(Duration::from_millis);
    let (session, handle) = SessionBuilder::new(settings).spawn();

    for path in &cli.images {
        let file = match ImageFile::from_path(path).await {
            Ok(file) => file,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        if let Some(view) = classify(&handle, file, cancel_after).await? {
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        handle.clear().await?;
    }

    handle.shutdown().await?;
    session.join().await
}

/// Runs one image to a terminal state, or clears it after `cancel_after`.
async fn classify(
    handle: &SessionHandle,
    file: ImageFile,
    cancel_after: Option<Duration>,
) -> Result<Option<ViewState>, AppError> {
    let name = file.name().to_string();
    if let IngestOutcome::Ignored(reason) = handle.select_file(file).await? {
        warn!("Skipping '{}': {}", name, reason);
        return Ok(None);
    }

    let mut updates = BroadcastStream::new(handle.subscribe());
    match handle.start_classification().await? {
        StartOutcome::Started { run } => info!("Classifying '{}' (run {})", name, run),
        other => {
            warn!("Could not start classification of '{}': {:?}", name, other);
            return Ok(None);
        }
    }

    let finished = async {
        while let Some(update) = updates.next().await {
            let Ok(snapshot) = update else {
                continue;
            };
            let view = ViewState::derive(&snapshot.workflow);
            if let Some(stage) = view.active_stage {
                info!("'{}': {} ({:.0}%)", name, stage, view.progress * 100.0);
            }
            if view.is_terminal() {
                return Some(view);
            }
        }
        None
    };

    let Some(after) = cancel_after else {
        return Ok(finished.await);
    };
    match tokio::time::timeout(after, finished).await {
        Ok(view) => Ok(view),
        Err(_) => {
            handle.clear().await?;
            info!("Cancelled '{}' after {}ms", name, after.as_millis());
            let snapshot = handle.snapshot().await?;
            Ok(Some(ViewState::derive(&snapshot.workflow)))
        }
    }
}

//! Service orchestration
//!
//! Startup order: validate config, create directories, honour the enable
//! flag, connect (fatal once retries are exhausted), migrate, sweep the
//! backlog, then watch until shutdown. The pool is closed and the watcher
//! stopped on every exit path.

use std::future::Future;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{CmlStore, DbWriter};
use crate::files::FileManager;
use crate::parsers::ParserRegistry;
use crate::service::{FileOutcome, FileProcessor, ProcessingStats};
use crate::watcher::{wait_for_stable, DirectoryWatcher, Stability};

/// The long-running parser service
pub struct ParserService {
    config: Config,
}

impl ParserService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run until `shutdown` resolves. With `once`, stop after the backlog
    /// sweep instead of watching.
    pub async fn run<F>(&self, shutdown: F, once: bool) -> Result<ProcessingStats>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.config.validate().context("Invalid configuration")?;

        let files = FileManager::new(&self.config.paths);
        files
            .ensure_directories()
            .context("Failed to create data directories")?;

        let mut stop = shutdown_flag(shutdown);

        if !self.config.enabled {
            warn!("Parser is disabled, not consuming files");
            if !once {
                let _ = stop.wait_for(|stopped| *stopped).await;
            }
            return Ok(ProcessingStats::default());
        }

        let writer = DbWriter::connect(&self.config.database)
            .await
            .context("Failed to connect to database")?;
        info!("Database connection established");

        let result = self.serve(&writer, files, stop, once).await;

        writer.close().await;
        info!("Database connection closed");

        result
    }

    async fn serve(
        &self,
        writer: &DbWriter,
        files: FileManager,
        stop: watch::Receiver<bool>,
        once: bool,
    ) -> Result<ProcessingStats> {
        if self.config.run_migrations {
            writer
                .run_migrations()
                .await
                .context("Failed to run migrations")?;
        }

        let processor = FileProcessor::new(ParserRegistry::new(), writer.clone(), files);
        drive(&self.config, &processor, stop, once).await
    }
}

/// Turn a shutdown future into a flag that can be checked between files
pub fn shutdown_flag<F>(shutdown: F) -> watch::Receiver<bool>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown.await;
        let _ = tx.send(true);
    });
    rx
}

/// Backlog sweep followed by the watch loop, against any store.
///
/// The watcher is started before the sweep so files landing during the sweep
/// are queued rather than missed; a queued path the sweep already handled is
/// skipped because it no longer exists. Backlog files get the same
/// stabilization wait as watched ones.
pub async fn drive<S: CmlStore>(
    config: &Config,
    processor: &FileProcessor<S>,
    mut stop: watch::Receiver<bool>,
    once: bool,
) -> Result<ProcessingStats> {
    let incoming = processor.files().incoming_dir().to_path_buf();

    let mut watcher = if once {
        None
    } else {
        Some(
            DirectoryWatcher::start(&incoming, &config.watcher)
                .context("Failed to start directory watcher")?,
        )
    };

    let mut stats = ProcessingStats::default();

    if config.process_existing_on_startup {
        let backlog = processor
            .files()
            .backlog(&config.watcher.extensions)
            .context("Failed to list incoming directory")?;
        info!(count = backlog.len(), "Processing existing files");

        for path in backlog {
            if *stop.borrow() {
                info!("Shutdown requested, leaving remaining backlog in place");
                break;
            }
            // a restart can find a file still being uploaded
            let stability = wait_for_stable(
                &path,
                config.watcher.stabilize_interval(),
                config.watcher.stabilize_timeout(),
            )
            .await;
            if stability == Stability::Vanished {
                stats.record(&FileOutcome::Vanished);
                continue;
            }
            stats.record(&processor.process(&path).await);
        }
        stats.log_summary("Backlog");
    }

    if let Some(watcher) = watcher.as_mut() {
        info!(path = %incoming.display(), "Waiting for new files");

        while !*stop.borrow() {
            tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break,
                ready = watcher.next_ready() => match ready {
                    Some(file) => stats.record(&processor.process(&file.path).await),
                    None => {
                        warn!("Watcher event stream ended");
                        break;
                    }
                },
            }
        }

        watcher.stop();
        stats.skipped += watcher.vanished();
        info!("Shutdown requested, watcher stopped");
    }

    stats.log_summary("Run");
    Ok(stats)
}

//! Directory watcher
//!
//! Subscribes to creation events on one directory (non-recursive) and hands
//! out paths once their size has stopped changing. Events arrive on the
//! `notify` thread and are bridged into a tokio channel; the consumer pulls
//! one ready file at a time with [`DirectoryWatcher::next_ready`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::error::WatchError;
use crate::files::is_candidate;

/// Result of waiting for a file to finish landing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Same non-zero size on two consecutive polls
    Stable,
    /// Still changing (or empty) at the deadline; processed anyway
    TimedOut,
    /// Gone before it stabilized
    Vanished,
}

/// Poll `path`'s size every `interval` until it stops changing or `timeout`
/// elapses
pub async fn wait_for_stable(path: &Path, interval: Duration, timeout: Duration) -> Stability {
    let deadline = Instant::now() + timeout;
    let mut last_size: Option<u64> = None;

    loop {
        match std::fs::metadata(path) {
            Ok(meta) => {
                let size = meta.len();
                if size > 0 && last_size == Some(size) {
                    debug!(path = %path.display(), size, "File is stable");
                    return Stability::Stable;
                }
                last_size = Some(size);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "File vanished while stabilizing");
                return Stability::Vanished;
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Could not stat file");
            }
        }

        if Instant::now() >= deadline {
            warn!(
                path = %path.display(),
                timeout_secs = timeout.as_secs_f64(),
                "File did not stabilize before timeout, processing anyway"
            );
            return Stability::TimedOut;
        }

        tokio::time::sleep(interval).await;
    }
}

/// Paths currently being stabilized or processed
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path`; `None` if it is already claimed
    pub fn claim(&self, path: &Path) -> Option<Claim> {
        if !self.lock().insert(path.to_path_buf()) {
            return None;
        }
        Some(Claim {
            path: path.to_path_buf(),
            paths: Arc::clone(&self.paths),
        })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases its path from the in-flight set when dropped
#[derive(Debug)]
pub struct Claim {
    path: PathBuf,
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut paths = self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        paths.remove(&self.path);
    }
}

/// A file that has finished landing and is claimed for processing
#[derive(Debug)]
pub struct ReadyFile {
    pub path: PathBuf,
    pub stability: Stability,
    _claim: Claim,
}

/// Creation events and renames into the directory both mean "new file"
fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
            | EventKind::Modify(ModifyKind::Name(RenameMode::Both))
    )
}

/// Watches one directory and yields ready files
pub struct DirectoryWatcher {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    events: mpsc::UnboundedReceiver<PathBuf>,
    in_flight: InFlight,
    interval: Duration,
    timeout: Duration,
    vanished: usize,
}

impl DirectoryWatcher {
    /// Start watching `dir`
    pub fn start(dir: &Path, config: &WatcherConfig) -> Result<Self, WatchError> {
        if !dir.is_dir() {
            return Err(WatchError::MissingDirectory(dir.to_path_buf()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let extensions = config.extensions.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if is_arrival(&event.kind) => {
                    for path in event.paths {
                        if is_candidate(&path, &extensions) && tx.send(path).is_err() {
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Filesystem watcher error"),
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        info!(
            path = %dir.display(),
            extensions = ?config.extensions,
            "Watching directory"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            watcher: Some(watcher),
            events: rx,
            in_flight: InFlight::new(),
            interval: config.stabilize_interval(),
            timeout: config.stabilize_timeout(),
            vanished: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Events whose file was gone before it stabilized
    pub fn vanished(&self) -> usize {
        self.vanished
    }

    /// Next file that has landed and stabilized.
    ///
    /// Returns `None` once the watcher is stopped and queued events are
    /// drained. If the call is cancelled while a file is stabilizing, the
    /// file stays in the directory and is picked up by the next backlog sweep.
    pub async fn next_ready(&mut self) -> Option<ReadyFile> {
        loop {
            let path = self.events.recv().await?;

            if path.is_dir() {
                continue;
            }

            let Some(claim) = self.in_flight.claim(&path) else {
                debug!(path = %path.display(), "Duplicate event for in-flight file");
                continue;
            };

            debug!(path = %path.display(), "File detected, waiting for it to stabilize");
            match wait_for_stable(&path, self.interval, self.timeout).await {
                Stability::Vanished => {
                    self.vanished += 1;
                    continue;
                }
                stability => {
                    return Some(ReadyFile {
                        path,
                        stability,
                        _claim: claim,
                    })
                }
            }
        }
    }

    /// Stop receiving events; already queued paths can still be drained
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.dir) {
                debug!(error = %e, "Unwatch failed");
            }
            info!(path = %self.dir.display(), "Stopped watching directory");
        }
        self.events.close();
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

//! Shared helpers for unit tests: an in-memory store, log capture and a way
//! to make a directory refuse unlinks.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cml_common::types::{LinkKey, LinkMetadata, RawSample};
use tracing_subscriber::fmt::MakeWriter;

use crate::db::{CmlStore, DbError, DbResult};

pub(crate) const METADATA_HEADER: &str = "link_id,sublink_id,site_0_longitude,site_0_latitude,\
                                          site_1_longitude,site_1_latitude,frequency,polarization,length";
pub(crate) const DATA_HEADER: &str = "time,link_id,sublink_id,transmitted_level,received_level";

pub(crate) const BERLIN_ROW: &str =
    "10001,sublink_1,13.3888,52.5170,13.4050,52.5200,38000.0,H,1200.5";

/// Header line plus rows, newline terminated
pub(crate) fn csv(header: &str, rows: &[&str]) -> String {
    let mut body = format!("{header}\n");
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }
    body
}

/// Keyed metadata map plus an append-only sample list
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub metadata: Mutex<BTreeMap<LinkKey, LinkMetadata>>,
    pub samples: Mutex<Vec<RawSample>>,
    pub fail_writes: AtomicBool,
    pub fail_reference_check: AtomicBool,
    /// Each write sleeps this long before applying
    pub write_delay: Duration,
    /// Set while a delayed write is sleeping
    pub writing: AtomicBool,
}

impl MemoryStore {
    pub fn with_write_delay(write_delay: Duration) -> Self {
        Self {
            write_delay,
            ..Self::default()
        }
    }

    pub fn metadata(&self) -> BTreeMap<LinkKey, LinkMetadata> {
        self.metadata.lock().unwrap().clone()
    }

    pub fn samples(&self) -> Vec<RawSample> {
        self.samples.lock().unwrap().clone()
    }

    async fn before_write(&self) -> DbResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        if !self.write_delay.is_zero() {
            self.writing.store(true, Ordering::SeqCst);
            tokio::time::sleep(self.write_delay).await;
            self.writing.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl CmlStore for MemoryStore {
    async fn write_metadata(&self, records: &[LinkMetadata]) -> DbResult<u64> {
        self.before_write().await?;
        let mut metadata = self.metadata.lock().unwrap();
        for record in records {
            metadata.insert(record.key(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn write_timeseries(&self, records: &[RawSample]) -> DbResult<u64> {
        self.before_write().await?;
        self.samples.lock().unwrap().extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn missing_references(&self, records: &[RawSample]) -> DbResult<BTreeSet<LinkKey>> {
        if self.fail_reference_check.load(Ordering::SeqCst) {
            return Err(DbError::config("reference check unavailable"));
        }
        let metadata = self.metadata.lock().unwrap();
        Ok(records
            .iter()
            .map(RawSample::key)
            .filter(|key| !metadata.contains_key(key))
            .collect())
    }
}

/// In-memory sink for formatted log lines
#[derive(Clone, Default)]
pub(crate) struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's events here until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Make `dir` refuse unlinks: `chattr +a` where supported (works as root),
/// otherwise a read-only mode. Returns the undo action, or `None` when
/// neither takes effect on this machine.
#[cfg(unix)]
pub(crate) fn block_unlinks(dir: &Path) -> Option<Box<dyn FnOnce()>> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::process::Command;

    let canary = dir.join(".unlink-canary");
    let chattr = |flag: &str| {
        Command::new("chattr")
            .arg(flag)
            .arg(dir)
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    };

    if chattr("+a") {
        let blocked = fs::write(&canary, "").is_ok() && fs::remove_file(&canary).is_err();
        if blocked {
            let dir = dir.to_path_buf();
            return Some(Box::new(move || {
                let _ = Command::new("chattr").arg("-a").arg(&dir).status();
                let _ = fs::remove_file(dir.join(".unlink-canary"));
            }));
        }
        chattr("-a");
        let _ = fs::remove_file(&canary);
    }

    fs::set_permissions(dir, fs::Permissions::from_mode(0o555)).ok()?;
    let restore = {
        let dir = dir.to_path_buf();
        move || {
            let _ = fs::set_permissions(&dir, fs::Permissions::from_mode(0o755));
        }
    };
    // permissions are not enforced for root
    if fs::write(&canary, "").is_ok() {
        let _ = fs::remove_file(&canary);
        restore();
        return None;
    }
    Some(Box::new(restore))
}

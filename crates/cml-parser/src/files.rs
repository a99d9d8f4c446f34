//! File lifecycle: archive on success, quarantine on failure
//!
//! Layout:
//! - archive: `{archive_root}/{YYYY-MM-DD}/{file name}` (UTC processing date)
//! - quarantine: `{quarantine_root}/{file name}` plus `{file name}.error.txt`
//!
//! Moves try an atomic rename first and fall back to copy-then-delete when
//! source and destination sit on different filesystems. The source is only
//! removed after the destination copy has been synced and its size checked.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, SecondsFormat, Utc};
use tracing::{debug, error, info, warn};

use crate::config::PathsConfig;
use crate::error::FileError;

/// Suffix appended to a quarantined file's name for its note
pub const ERROR_NOTE_SUFFIX: &str = ".error.txt";

/// Moves processed files to their terminal location
#[derive(Debug, Clone)]
pub struct FileManager {
    incoming: PathBuf,
    archive_root: PathBuf,
    quarantine_root: PathBuf,
}

impl FileManager {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            incoming: paths.incoming_dir.clone(),
            archive_root: paths.archived_dir.clone(),
            quarantine_root: paths.quarantine_dir.clone(),
        }
    }

    pub fn incoming_dir(&self) -> &Path {
        &self.incoming
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    pub fn quarantine_root(&self) -> &Path {
        &self.quarantine_root
    }

    /// Create the incoming, archive and quarantine directories
    pub fn ensure_directories(&self) -> Result<(), FileError> {
        for dir in [&self.incoming, &self.archive_root, &self.quarantine_root] {
            fs::create_dir_all(dir).map_err(|e| FileError::io("create directory", dir, e))?;
            debug!(path = %dir.display(), "Directory ready");
        }
        Ok(())
    }

    /// Archive destination for `path` processed on `date`
    pub fn archive_path_for(&self, path: &Path, date: NaiveDate) -> Result<PathBuf, FileError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| FileError::NotFound(path.to_path_buf()))?;
        Ok(self
            .archive_root
            .join(date.format("%Y-%m-%d").to_string())
            .join(file_name))
    }

    /// Move a processed file under today's (UTC) archive folder
    pub fn archive(&self, path: &Path) -> Result<PathBuf, FileError> {
        self.archive_on(path, Utc::now().date_naive())
    }

    /// Move a processed file under the archive folder for `date`.
    ///
    /// An existing archive entry with the same name is replaced.
    pub fn archive_on(&self, path: &Path, date: NaiveDate) -> Result<PathBuf, FileError> {
        if !path.is_file() {
            return Err(FileError::NotFound(path.to_path_buf()));
        }

        let destination = self.archive_path_for(path, date)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| FileError::io("create archive directory", parent, e))?;
        }

        move_file(path, &destination)?;

        info!(
            from = %path.display(),
            to = %destination.display(),
            "Archived file"
        );
        Ok(destination)
    }

    /// Move a failed file into quarantine and write its note.
    ///
    /// Never fails. If the move fails the note is written next to the
    /// original and the original path is returned. If the file is already
    /// gone only the note is written, and its path is returned.
    pub fn quarantine(&self, path: &Path, reason: &str) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        if let Err(e) = fs::create_dir_all(&self.quarantine_root) {
            error!(
                path = %self.quarantine_root.display(),
                error = %e,
                "Failed to create quarantine directory"
            );
        }

        if !path.exists() {
            let note = self.quarantine_root.join(format!("{file_name}{ERROR_NOTE_SUFFIX}"));
            let body = format!(
                "Original file not found: {}\nError: {}\n",
                path.display(),
                reason
            );
            write_note(&note, &body);
            warn!(path = %path.display(), reason, "Quarantine requested for missing file");
            return note;
        }

        let destination = self.quarantine_root.join(&file_name);
        let body = note_body(path, reason);

        match move_file(path, &destination) {
            Ok(()) => {
                write_note(&note_path_for(&destination), &body);
                warn!(
                    from = %path.display(),
                    to = %destination.display(),
                    reason,
                    "Quarantined file"
                );
                destination
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    reason,
                    "CRITICAL: failed to move file into quarantine, leaving it in place"
                );
                write_note(&note_path_for(path), &body);
                path.to_path_buf()
            }
        }
    }

    /// Files already waiting in the incoming directory, sorted by name
    pub fn backlog(&self, extensions: &[String]) -> Result<Vec<PathBuf>, FileError> {
        let entries = fs::read_dir(&self.incoming)
            .map_err(|e| FileError::io("list", &self.incoming, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FileError::io("list", &self.incoming, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let path = entry.path();
            if is_file && is_candidate(&path, extensions) {
                files.push(path);
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }
}

/// Path of the note written for `path`
pub fn note_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(ERROR_NOTE_SUFFIX);
    path.with_file_name(name)
}

/// Name starts with a dot
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Visible file with one of the configured (lowercase, dot-less) extensions
pub fn is_candidate(path: &Path, extensions: &[String]) -> bool {
    if is_hidden(path) {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|ext| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn note_body(path: &Path, reason: &str) -> String {
    format!(
        "Quarantined at: {}\nError: {}\nOriginalPath: {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        reason,
        path.display()
    )
}

fn write_note(note: &Path, body: &str) {
    if let Err(e) = fs::write(note, body) {
        error!(
            path = %note.display(),
            error = %e,
            "CRITICAL: failed to write quarantine note"
        );
    }
}

/// Whether `source` can be renamed into `dest_dir` without copying
pub fn can_rename_atomically(source: &Path, dest_dir: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (fs::metadata(source), fs::metadata(dest_dir)) {
            (Ok(src), Ok(dst)) => src.dev() == dst.dev(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        source.exists() && dest_dir.is_dir()
    }
}

fn move_file(source: &Path, destination: &Path) -> Result<(), FileError> {
    let dest_dir = destination.parent().unwrap_or_else(|| Path::new("."));

    if can_rename_atomically(source, dest_dir) {
        match fs::rename(source, destination) {
            Ok(()) => return Ok(()),
            Err(e) => warn!(
                from = %source.display(),
                to = %destination.display(),
                error = %e,
                "Rename failed, falling back to copy"
            ),
        }
    } else {
        debug!(
            from = %source.display(),
            to = %destination.display(),
            "Different filesystems, copying"
        );
    }

    copy_then_remove(source, destination)
}

/// Copy to a hidden sibling of `destination`, sync, rename into place,
/// verify the size, then delete `source`
pub(crate) fn copy_then_remove(source: &Path, destination: &Path) -> Result<(), FileError> {
    let expected = fs::metadata(source)
        .map_err(|e| FileError::io("stat", source, e))?
        .len();

    let file_name = destination
        .file_name()
        .ok_or_else(|| FileError::NotFound(destination.to_path_buf()))?
        .to_string_lossy()
        .into_owned();
    let temp = destination.with_file_name(format!(".{file_name}.partial"));

    if let Err(e) = copy_synced(source, &temp) {
        let _ = fs::remove_file(&temp);
        return Err(FileError::io("copy", source, e));
    }

    if let Err(e) = fs::rename(&temp, destination) {
        let _ = fs::remove_file(&temp);
        return Err(FileError::io("rename copy of", source, e));
    }

    // from here on a failure must not leave the copy behind
    if let Err(e) = confirm_copy(source, destination, expected) {
        if let Err(cleanup) = fs::remove_file(destination) {
            error!(
                path = %destination.display(),
                error = %cleanup,
                "Failed to remove copy after incomplete move"
            );
        }
        return Err(e);
    }

    Ok(())
}

/// Check the copy's size, make the rename durable, then remove `source`
fn confirm_copy(source: &Path, destination: &Path, expected: u64) -> Result<(), FileError> {
    let actual = fs::metadata(destination)
        .map_err(|e| FileError::io("stat", destination, e))?
        .len();
    if actual != expected {
        return Err(FileError::IncompleteCopy {
            path: destination.to_path_buf(),
            expected,
            actual,
        });
    }

    if let Some(parent) = destination.parent() {
        sync_dir(parent).map_err(|e| FileError::io("sync", parent, e))?;
    }

    fs::remove_file(source).map_err(|e| FileError::io("remove", source, e))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn copy_synced(source: &Path, temp: &Path) -> io::Result<()> {
    let mut reader = fs::File::open(source)?;
    let mut writer = fs::File::create(temp)?;
    io::copy(&mut reader, &mut writer)?;
    writer.sync_all()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(root: &Path) -> FileManager {
        let manager = FileManager::new(&PathsConfig {
            incoming_dir: root.join("incoming"),
            archived_dir: root.join("archived"),
            quarantine_dir: root.join("quarantine"),
        });
        manager.ensure_directories().unwrap();
        manager
    }

    fn incoming_file(manager: &FileManager, name: &str, body: &str) -> PathBuf {
        let path = manager.incoming_dir().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_archive_moves_under_date_folder() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        let source = incoming_file(&manager, "cml_data_1.csv", "time\n");
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();

        let archived = manager.archive_on(&source, date).unwrap();

        assert_eq!(
            archived,
            tmp.path().join("archived/2025-01-15/cml_data_1.csv")
        );
        assert!(archived.exists());
        assert!(!source.exists());
    }

    #[test]
    fn test_archive_uses_today() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        let source = incoming_file(&manager, "cml_metadata_1.csv", "x");

        let archived = manager.archive(&source).unwrap();
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        assert!(archived.parent().unwrap().ends_with(today));
    }

    #[test]
    fn test_archive_same_name_replaces_previous_entry() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();

        let first = incoming_file(&manager, "cml_data_1.csv", "first");
        manager.archive_on(&first, date).unwrap();
        let second = incoming_file(&manager, "cml_data_1.csv", "second");
        let archived = manager.archive_on(&second, date).unwrap();

        assert_eq!(fs::read_to_string(archived).unwrap(), "second");
    }

    #[test]
    fn test_archive_missing_file() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        let missing = manager.incoming_dir().join("gone.csv");

        assert!(matches!(
            manager.archive(&missing),
            Err(FileError::NotFound(_))
        ));
    }

    #[test]
    fn test_quarantine_writes_note() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        let source = incoming_file(&manager, "cml_metadata_bad.csv", "x");

        let moved = manager.quarantine(&source, "Invalid longitude 200");

        assert_eq!(moved, tmp.path().join("quarantine/cml_metadata_bad.csv"));
        assert!(moved.exists());
        assert!(!source.exists());

        let note = fs::read_to_string(note_path_for(&moved)).unwrap();
        let lines: Vec<&str> = note.lines().collect();
        assert!(lines[0].starts_with("Quarantined at: "));
        assert!(lines[0].ends_with('Z'));
        assert_eq!(lines[1], "Error: Invalid longitude 200");
        assert_eq!(lines[2], format!("OriginalPath: {}", source.display()));
    }

    #[test]
    fn test_quarantine_missing_file_writes_note_only() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        let missing = manager.incoming_dir().join("vanished.csv");

        let note = manager.quarantine(&missing, "boom");

        assert_eq!(note, tmp.path().join("quarantine/vanished.csv.error.txt"));
        let body = fs::read_to_string(note).unwrap();
        assert!(body.starts_with("Original file not found: "));
        assert!(body.contains("Error: boom"));
        assert!(!tmp.path().join("quarantine/vanished.csv").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_quarantine_move_failure_keeps_file_and_writes_note_beside_it() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        let source = incoming_file(&manager, "cml_data_stuck.csv", "x");

        // read-only quarantine root
        let root = manager.quarantine_root().to_path_buf();
        fs::set_permissions(&root, fs::Permissions::from_mode(0o555)).unwrap();
        let canary = root.join(".canary");
        if fs::write(&canary, "").is_ok() {
            // running as root: permissions are not enforced
            let _ = fs::remove_file(&canary);
            fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = manager.quarantine(&source, "db down");
        fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(result, source);
        assert!(source.exists());
        let note = fs::read_to_string(note_path_for(&source)).unwrap();
        assert!(note.contains("Error: db down"));
    }

    #[test]
    fn test_copy_then_remove() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.csv");
        let target_dir = tmp.path().join("other");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(&source, "payload").unwrap();

        let destination = target_dir.join("a.csv");
        copy_then_remove(&source, &destination).unwrap();

        assert_eq!(fs::read_to_string(&destination).unwrap(), "payload");
        assert!(!source.exists());
        assert!(!target_dir.join(".a.csv.partial").exists());
    }

    #[test]
    fn test_copy_then_remove_keeps_source_on_failure() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.csv");
        fs::write(&source, "payload").unwrap();

        let destination = tmp.path().join("missing-dir").join("a.csv");
        assert!(copy_then_remove(&source, &destination).is_err());
        assert!(source.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_then_remove_leaves_no_copy_when_source_cannot_be_removed() {
        let tmp = TempDir::new().unwrap();
        let source_dir = tmp.path().join("incoming");
        let target_dir = tmp.path().join("archived");
        fs::create_dir_all(&source_dir).unwrap();
        fs::create_dir_all(&target_dir).unwrap();
        let source = source_dir.join("cml_metadata_a.csv");
        fs::write(&source, "payload").unwrap();

        let Some(unblock) = crate::test_support::block_unlinks(&source_dir) else {
            println!("Skipping test: cannot make a directory refuse unlinks here");
            return;
        };

        let destination = target_dir.join("cml_metadata_a.csv");
        let result = copy_then_remove(&source, &destination);
        unblock();

        assert!(matches!(result, Err(FileError::Io { action: "remove", .. })));
        assert!(source.exists());
        assert!(!destination.exists());
        assert!(!target_dir.join(".cml_metadata_a.csv.partial").exists());
    }

    #[test]
    fn test_can_rename_atomically_same_filesystem() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("a.csv");
        fs::write(&source, "x").unwrap();

        assert!(can_rename_atomically(&source, tmp.path()));
        assert!(!can_rename_atomically(&tmp.path().join("nope"), tmp.path()));
    }

    #[test]
    fn test_backlog_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        incoming_file(&manager, "cml_metadata_b.csv", "x");
        incoming_file(&manager, "cml_data_a.CSV", "x");
        incoming_file(&manager, ".cml_data_hidden.csv", "x");
        incoming_file(&manager, "readme.txt", "x");
        fs::create_dir(manager.incoming_dir().join("sub.csv")).unwrap();

        let backlog = manager.backlog(&["csv".to_string()]).unwrap();
        let names: Vec<_> = backlog
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["cml_data_a.CSV", "cml_metadata_b.csv"]);
    }

    #[test]
    fn test_is_candidate() {
        let exts = vec!["csv".to_string()];
        assert!(is_candidate(Path::new("/in/a.csv"), &exts));
        assert!(!is_candidate(Path::new("/in/.a.csv"), &exts));
        assert!(!is_candidate(Path::new("/in/a.csv.part"), &exts));
        assert!(!is_candidate(Path::new("/in/a"), &exts));
    }

    #[test]
    fn test_note_path_for() {
        assert_eq!(
            note_path_for(Path::new("/q/cml_data_1.csv")),
            PathBuf::from("/q/cml_data_1.csv.error.txt")
        );
    }
}

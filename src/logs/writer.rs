use crate::config::RotationConfig;
use crate::error::{Result, RotalogError};
use crate::logs::policy::{FileStat, RotationPolicy, SequenceCursor};
use crate::logs::retention::{Compressor, RetentionSweeper};
use crate::logs::sink::RecordSink;
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Mutable state guarded by the writer lock
struct ActiveFile {
    file: Option<File>,
    cursor: SequenceCursor,
    rotations: u64,
}

/// LogWriter-style rotating file writer
///
/// Owns the active file at `path`, serializes writes under one lock and
/// rotates the file to an archive path when the configured size or time
/// bucket threshold is crossed. After each rotation a retention sweep runs
/// on a detached thread.
pub struct RotatingWriter {
    /// Path of the active file
    path: PathBuf,
    config: RotationConfig,
    policy: RotationPolicy,
    sweeper: Arc<RetentionSweeper>,
    active: Mutex<ActiveFile>,
    /// Handles of sweeps that may still be running
    sweeps: Mutex<Vec<JoinHandle<()>>>,
    /// Opens the replacement active file after a rename
    opener: fn(&Path) -> Result<File>,
}

impl RotatingWriter {
    /// Open or create the active file at `path`
    ///
    /// # Arguments
    /// * `path` - Active log file; parent directories are created
    /// * `config` - Rotation and retention settings
    ///
    /// # Returns
    /// * `Ok(RotatingWriter)` - File is open for appending
    /// * `Err(RotalogError)` - Invalid config or the file could not be opened
    pub fn open(path: impl AsRef<Path>, config: RotationConfig) -> Result<Self> {
        config.validate()?;

        let path = absolute(path.as_ref())?;
        let sweeper = RetentionSweeper::from_config(&path, &config);
        Self::open_with_sweeper(path, config, sweeper)
    }

    /// Like [`open`](Self::open) with a custom compressor for archives
    pub fn open_with_compressor(
        path: impl AsRef<Path>,
        config: RotationConfig,
        compressor: Arc<dyn Compressor>,
    ) -> Result<Self> {
        config.validate()?;

        let path = absolute(path.as_ref())?;
        let sweeper = RetentionSweeper::new(&path, config.max_age(), config.max_count)
            .with_compressor(compressor);
        Self::open_with_sweeper(path, config, sweeper)
    }

    fn open_with_sweeper(
        path: PathBuf,
        config: RotationConfig,
        sweeper: RetentionSweeper,
    ) -> Result<Self> {
        let file = open_active(&path)?;
        let policy = RotationPolicy::from_config(&config);

        debug!(
            path = %path.display(),
            size_threshold = config.size_threshold_bytes,
            time_format = %config.time_format,
            "Opened rotating log file"
        );

        Ok(Self {
            path,
            config,
            policy,
            sweeper: Arc::new(sweeper),
            active: Mutex::new(ActiveFile {
                file: Some(file),
                cursor: SequenceCursor::default(),
                rotations: 0,
            }),
            sweeps: Mutex::new(Vec::new()),
            opener: open_active,
        })
    }

    /// Write one record stamped with its logical time
    ///
    /// Rotates first when the record crosses a threshold. Rotation problems
    /// are logged and the record still lands in the current file; only a
    /// failure to write, or to open the replacement file after a successful
    /// rename, is returned.
    pub fn write_record(&self, record: &[u8], timestamp: DateTime<Utc>) -> Result<usize> {
        let mut active = self.lock_active();
        if active.file.is_none() {
            return Err(RotalogError::WriterClosed);
        }

        match self.rotate_if_needed(&mut active, timestamp) {
            Ok(Some(archive)) => self.spawn_retention(archive),
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Rotation skipped for {}: {}", self.path.display(), e),
        }

        let file = active.file.as_mut().ok_or(RotalogError::WriterClosed)?;
        file.write_all(record)?;

        // The file's modification time names the bucket of its last record
        if let Err(e) = file.set_modified(timestamp.into()) {
            debug!("Failed to stamp {}: {}", self.path.display(), e);
        }

        Ok(record.len())
    }

    /// Rotate the active file when the policy says so
    ///
    /// Returns the archive path on rotation. Stat and rename failures come
    /// back as soft `LogRotationError`s with the old handle still in place.
    fn rotate_if_needed(
        &self,
        active: &mut ActiveFile,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<PathBuf>> {
        if self.policy.is_disabled() {
            return Ok(None);
        }

        let file = active.file.as_ref().ok_or(RotalogError::WriterClosed)?;
        let stat = file
            .metadata()
            .and_then(|m| FileStat::from_metadata(&m))
            .map_err(|e| RotalogError::LogRotationError(format!("Failed to stat log: {}", e)))?;

        let decision = self.policy.decide(&stat, timestamp);
        if !decision.should_rotate() {
            return Ok(None);
        }

        // Name the archive after the period the file's content belongs to
        let archive = self
            .policy
            .archive_path(&self.path, stat.modified, &mut active.cursor);

        fs::rename(&self.path, &archive).map_err(|e| {
            RotalogError::LogRotationError(format!(
                "Failed to rename {} to {}: {}",
                self.path.display(),
                archive.display(),
                e
            ))
        })?;

        // Fatal from here: the old handle now points at the archive
        let fresh = (self.opener)(&self.path)?;
        let previous = active.file.replace(fresh);
        drop(previous);
        active.rotations += 1;

        info!(
            archive = %archive.display(),
            by_time = decision.by_time,
            by_size = decision.by_size,
            "Rotated log file"
        );

        Ok(Some(archive))
    }

    /// Launch a detached retention sweep for a freshly rotated archive
    fn spawn_retention(&self, archive: PathBuf) {
        if self.sweeper.is_noop() {
            return;
        }

        let sweeper = Arc::clone(&self.sweeper);
        let spawned = std::thread::Builder::new()
            .name("rotalog-retention".to_string())
            .spawn(move || {
                let report = sweeper.sweep(Some(&archive));
                debug!(
                    archive = %archive.display(),
                    removed = report.removed(),
                    "Retention sweep finished"
                );
            });

        match spawned {
            Ok(handle) => {
                let mut sweeps = self.sweeps.lock().unwrap_or_else(PoisonError::into_inner);
                sweeps.retain(|h| !h.is_finished());
                sweeps.push(handle);
            }
            Err(e) => warn!("Failed to start retention sweep: {}", e),
        }
    }

    /// Block until every retention sweep started so far has finished
    ///
    /// Writes never wait for sweeps; this is for shutdown paths and tests.
    pub fn wait_for_retention(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut sweeps = self.sweeps.lock().unwrap_or_else(PoisonError::into_inner);
            sweeps.drain(..).collect()
        };

        for handle in handles {
            if handle.join().is_err() {
                warn!("Retention sweep panicked");
            }
        }
    }

    /// Flush the active file
    pub fn flush(&self) -> Result<()> {
        let mut active = self.lock_active();
        match active.file.as_mut() {
            Some(file) => Ok(file.flush()?),
            None => Err(RotalogError::WriterClosed),
        }
    }

    /// Release the active file handle
    ///
    /// Closing twice is a no-op. Writes after close fail with `WriterClosed`.
    pub fn close(&self) -> Result<()> {
        let mut active = self.lock_active();
        if let Some(mut file) = active.file.take() {
            file.flush()?;
            debug!("Closed rotating log file {}", self.path.display());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock_active().file.is_none()
    }

    /// Get the path to the active log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Size of the active file in bytes
    pub fn current_size(&self) -> Result<u64> {
        let active = self.lock_active();
        let file = active.file.as_ref().ok_or(RotalogError::WriterClosed)?;
        Ok(file.metadata()?.len())
    }

    /// Number of rotations performed by this writer
    pub fn rotation_count(&self) -> u64 {
        self.lock_active().rotations
    }

    fn lock_active(&self) -> MutexGuard<'_, ActiveFile> {
        // A panic mid-write leaves the file handle usable
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordSink for RotatingWriter {
    fn write_record(&self, record: &[u8], timestamp: DateTime<Utc>) -> Result<usize> {
        RotatingWriter::write_record(self, record, timestamp)
    }

    fn flush(&self) -> Result<()> {
        RotatingWriter::flush(self)
    }
}

impl std::fmt::Debug for RotatingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingWriter")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish()
    }
}

/// Create parent directories and open `path` for appending
fn open_active(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            RotalogError::DirectoryError(format!("{}: {}", parent.display(), e))
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RotalogError::LogFileError(format!("{}: {}", path.display(), e)))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 8, 30, 0).unwrap()
    }

    fn pin_mtime(path: &Path, at: DateTime<Utc>) {
        set_file_mtime(path, FileTime::from_unix_time(at.timestamp(), 0)).unwrap();
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/deeper/app.log");

        let writer = RotatingWriter::open(&path, RotationConfig::default()).unwrap();
        assert!(path.exists());
        assert_eq!(writer.path(), path.as_path());
        assert_eq!(writer.current_size().unwrap(), 0);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");

        let result = RotatingWriter::open(&path, RotationConfig::default().rotation_format("%Q"));
        assert!(matches!(result, Err(RotalogError::InvalidTimeFormat(_))));
    }

    #[test]
    fn test_open_rejects_format_expanding_to_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");

        let config = RotationConfig::default().rotation_format("%D").utc(true);
        let result = RotatingWriter::open(&path, config);
        assert!(matches!(result, Err(RotalogError::ConfigValidationError(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_plain_append_without_thresholds() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let writer = RotatingWriter::open(&path, RotationConfig::default()).unwrap();

        for i in 0..50 {
            let ts = t0() + ChronoDuration::days(i);
            writer.write_record(b"0123456789\n", ts).unwrap();
        }

        assert_eq!(writer.rotation_count(), 0);
        assert_eq!(files_in(temp_dir.path()), vec!["app.log"]);
        assert_eq!(writer.current_size().unwrap(), 550);
    }

    #[test]
    fn test_size_rotation_happens_on_next_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let writer =
            RotatingWriter::open(&path, RotationConfig::default().rotation_size(100)).unwrap();

        let record = [b'x'; 15];
        for i in 1..=10 {
            writer.write_record(&record, Utc::now()).unwrap();
            let expected = if i < 8 { 0 } else { 1 };
            assert_eq!(writer.rotation_count(), expected, "after write {}", i);
        }

        assert_eq!(files_in(temp_dir.path()), vec!["app.log", "app.log.1"]);
        assert_eq!(fs::metadata(temp_dir.path().join("app.log.1")).unwrap().len(), 105);
        assert_eq!(writer.current_size().unwrap(), 45);
    }

    #[test]
    fn test_time_rotation_uses_file_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let config = RotationConfig::default().rotation_format("minute").utc(true);
        let writer = RotatingWriter::open(&path, config).unwrap();
        pin_mtime(&path, t0());

        writer.write_record(b"first\n", t0()).unwrap();
        writer
            .write_record(b"same minute\n", t0() + ChronoDuration::seconds(45))
            .unwrap();
        assert_eq!(writer.rotation_count(), 0);

        writer
            .write_record(b"next minute\n", t0() + ChronoDuration::minutes(1))
            .unwrap();
        assert_eq!(writer.rotation_count(), 1);

        let archive = temp_dir.path().join("app.log.2024-05-20-08-30");
        assert_eq!(
            fs::read_to_string(&archive).unwrap(),
            "first\nsame minute\n"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "next minute\n");
    }

    #[test]
    fn test_write_stamps_record_time() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let writer = RotatingWriter::open(&path, RotationConfig::default()).unwrap();

        writer.write_record(b"stamped\n", t0()).unwrap();

        let modified: DateTime<Utc> = fs::metadata(&path).unwrap().modified().unwrap().into();
        assert_eq!(modified.timestamp(), t0().timestamp());
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_writes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let writer = RotatingWriter::open(&path, RotationConfig::default()).unwrap();

        writer.write_record(b"before close\n", Utc::now()).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();

        assert!(writer.is_closed());
        assert!(matches!(
            writer.write_record(b"after close\n", Utc::now()),
            Err(RotalogError::WriterClosed)
        ));
        assert!(matches!(writer.flush(), Err(RotalogError::WriterClosed)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "before close\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_rename_failure_keeps_writing() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("logs");
        let path = dir.join("app.log");
        let writer =
            RotatingWriter::open(&path, RotationConfig::default().rotation_size(10)).unwrap();
        writer.write_record(b"0123456789", Utc::now()).unwrap();

        // A read-only directory makes the rename fail
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).unwrap();
        let marker = dir.join("marker");
        let read_only = fs::write(&marker, b"").is_err();

        let result = writer.write_record(b"more\n", Utc::now());
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();

        if read_only {
            // Running as root ignores directory permissions
            assert_eq!(result.unwrap(), 5);
            assert_eq!(writer.rotation_count(), 0);
            assert_eq!(fs::read_to_string(&path).unwrap(), "0123456789more\n");
        }
    }

    #[test]
    fn test_reopen_failure_after_rename_is_returned() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let mut writer =
            RotatingWriter::open(&path, RotationConfig::default().rotation_size(10)).unwrap();
        writer.write_record(b"0123456789", Utc::now()).unwrap();

        writer.opener = |path| {
            Err(RotalogError::LogFileError(format!("{}: refused", path.display())))
        };

        let result = writer.write_record(b"lost\n", Utc::now());
        assert!(matches!(result, Err(RotalogError::LogFileError(_))));
        assert_eq!(writer.rotation_count(), 0);

        // The rename went through before the reopen failed
        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("app.log.1")).unwrap(),
            "0123456789"
        );
    }

    #[test]
    fn test_retention_runs_after_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let config = RotationConfig::default().rotation_size(5).rotation_count(2);
        let writer = RotatingWriter::open(&path, config).unwrap();

        for i in 0..6 {
            let ts = t0() + ChronoDuration::seconds(i);
            writer.write_record(b"12345", ts).unwrap();
            writer.wait_for_retention();
        }

        assert_eq!(writer.rotation_count(), 5);
        assert_eq!(
            files_in(temp_dir.path()),
            vec!["app.log", "app.log.4", "app.log.5"]
        );
    }
}

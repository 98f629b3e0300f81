use crate::config::RotationConfig;
use crate::logs::policy::{with_suffix, COMPRESSED_EXTENSION};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Turns a freshly rotated archive into a compressed sibling
///
/// Implementations must be safe to call from several sweep threads at once.
pub trait Compressor: Send + Sync {
    /// Compress `path` and return the path of the compressed file
    fn compress(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Gzip compressor writing `<path>.gz` and removing the original
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, path: &Path) -> io::Result<PathBuf> {
        let target = with_suffix(path, COMPRESSED_EXTENSION);
        let source = File::open(path)?;
        let modified = source.metadata()?.modified()?;

        let result = (|| -> io::Result<()> {
            let out = File::create(&target)?;
            let mut encoder = GzEncoder::new(BufWriter::new(out), self.level);
            io::copy(&mut BufReader::new(source), &mut encoder)?;
            let mut writer = encoder.finish()?;
            writer.flush()?;

            // Keep the archive's place in retention ordering
            let out = writer.into_inner().map_err(|e| e.into_error())?;
            out.set_modified(modified)?;
            out.sync_all()
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&target);
            return Err(e);
        }

        fs::remove_file(path)?;
        Ok(target)
    }
}

/// One archive file seen by a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// What a single sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub compressed: Option<PathBuf>,
    pub removed_by_age: Vec<PathBuf>,
    pub removed_by_count: Vec<PathBuf>,
}

impl SweepReport {
    /// Total number of files deleted
    pub fn removed(&self) -> usize {
        self.removed_by_age.len() + self.removed_by_count.len()
    }
}

/// Enforces age and count limits over the archives of one base path
///
/// A sweep never touches the active file and tolerates files vanishing
/// underneath it, so overlapping sweeps are harmless.
#[derive(Clone)]
pub struct RetentionSweeper {
    base_path: PathBuf,
    max_age: Duration,
    max_count: usize,
    compressor: Option<Arc<dyn Compressor>>,
}

impl std::fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("base_path", &self.base_path)
            .field("max_age", &self.max_age)
            .field("max_count", &self.max_count)
            .field("compress", &self.compressor.is_some())
            .finish()
    }
}

impl RetentionSweeper {
    /// Create a sweeper without compression
    ///
    /// # Arguments
    /// * `base_path` - Path of the active file; archives share it as prefix
    /// * `max_age` - Delete archives older than this (zero disables)
    /// * `max_count` - Keep at most this many archives (zero disables)
    pub fn new(base_path: impl Into<PathBuf>, max_age: Duration, max_count: usize) -> Self {
        Self {
            base_path: base_path.into(),
            max_age,
            max_count,
            compressor: None,
        }
    }

    /// Create a sweeper from a rotation config, gzip enabled by `compress`
    pub fn from_config(base_path: impl Into<PathBuf>, config: &RotationConfig) -> Self {
        let sweeper = Self::new(base_path, config.max_age(), config.max_count);
        if config.compress {
            sweeper.with_compressor(Arc::new(GzipCompressor::default()))
        } else {
            sweeper
        }
    }

    /// Plug in a compressor run on each freshly rotated archive
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// True when a sweep would neither compress nor delete anything
    pub fn is_noop(&self) -> bool {
        self.compressor.is_none() && self.max_age.is_zero() && self.max_count == 0
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Run one retention pass
    ///
    /// `just_rotated` is compressed first when a compressor is configured.
    /// Every failure is logged and skipped.
    pub fn sweep(&self, just_rotated: Option<&Path>) -> SweepReport {
        let mut report = SweepReport::default();

        if let (Some(compressor), Some(path)) = (&self.compressor, just_rotated) {
            match compressor.compress(path) {
                Ok(compressed) => {
                    debug!("Compressed {} to {}", path.display(), compressed.display());
                    report.compressed = Some(compressed);
                }
                Err(e) => warn!("Failed to compress {}: {}", path.display(), e),
            }
        }

        if self.max_age.is_zero() && self.max_count == 0 {
            return report;
        }

        let snapshot = self.snapshot();
        let now = SystemTime::now();
        let enforce_count = self.max_count > 0 && snapshot.len() > self.max_count;

        let mut survivors = Vec::with_capacity(snapshot.len());
        for entry in snapshot {
            if self.is_expired(&entry, now) {
                if remove_archive(&entry.path) {
                    report.removed_by_age.push(entry.path);
                }
                continue;
            }
            if enforce_count {
                survivors.push(entry);
            }
        }

        if survivors.len() > self.max_count {
            // Newest first
            survivors.sort_by(|a, b| b.modified.cmp(&a.modified));

            for entry in survivors.into_iter().skip(self.max_count) {
                if remove_archive(&entry.path) {
                    report.removed_by_count.push(entry.path);
                }
            }
        }

        if report.removed() > 0 {
            debug!(
                base = %self.base_path.display(),
                by_age = report.removed_by_age.len(),
                by_count = report.removed_by_count.len(),
                "Retention sweep removed archives"
            );
        }

        report
    }

    /// List the archives currently on disk
    ///
    /// Matches `base_path*`, skipping directories and the active file.
    pub fn snapshot(&self) -> Vec<ArchiveEntry> {
        let pattern = format!(
            "{}*",
            glob::Pattern::escape(&self.base_path.to_string_lossy())
        );

        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                debug!("Invalid retention pattern {}: {}", pattern, e);
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!("Skipping unreadable archive entry: {}", e);
                    continue;
                }
            };

            if path == self.base_path {
                continue;
            }

            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if metadata.is_dir() {
                continue;
            }

            if let Ok(modified) = metadata.modified() {
                entries.push(ArchiveEntry { path, modified });
            }
        }

        entries
    }

    fn is_expired(&self, entry: &ArchiveEntry, now: SystemTime) -> bool {
        if self.max_age.is_zero() {
            return false;
        }
        // Timestamps in the future are never expired
        match now.duration_since(entry.modified) {
            Ok(age) => age > self.max_age,
            Err(_) => false,
        }
    }
}

fn remove_archive(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            debug!("Failed to remove archive {}: {}", path.display(), e);
            false
        }
    }
}

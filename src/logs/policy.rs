use crate::config::RotationConfig;
use chrono::{DateTime, Local, Utc};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Extension appended by the gzip compressor, probed so a compressed
/// archive still reserves its sequence number
pub const COMPRESSED_EXTENSION: &str = "gz";

/// The parts of the active file's metadata that drive rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub modified: DateTime<Utc>,
    pub size: u64,
}

impl FileStat {
    pub fn new(modified: impl Into<DateTime<Utc>>, size: u64) -> Self {
        Self {
            modified: modified.into(),
            size,
        }
    }

    /// Read modification time and length from file metadata
    pub fn from_metadata(metadata: &std::fs::Metadata) -> std::io::Result<Self> {
        let modified: SystemTime = metadata.modified()?;
        Ok(Self::new(modified, metadata.len()))
    }
}

/// Outcome of [`RotationPolicy::decide`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationDecision {
    /// The record falls into a different time bucket than the file
    pub by_time: bool,
    /// The file reached the size threshold
    pub by_size: bool,
}

impl RotationDecision {
    pub fn should_rotate(&self) -> bool {
        self.by_time || self.by_size
    }
}

/// Tracks the last sequence number handed out per archive stem so
/// numbering stays monotonic even after retention frees a name or a
/// bucket comes back around
#[derive(Debug, Clone, Default)]
pub struct SequenceCursor {
    last: HashMap<PathBuf, u64>,
}

impl SequenceCursor {
    fn start_for(&self, stem: &Path) -> u64 {
        self.last_for(stem).map_or(1, |last| last + 1)
    }

    fn record(&mut self, stem: &Path, number: u64) {
        self.last.insert(stem.to_path_buf(), number);
    }

    /// Last number handed out for `stem`, if any
    pub fn last_for(&self, stem: &Path) -> Option<u64> {
        self.last.get(stem).copied()
    }
}

/// Pure rotation decisions plus archive naming
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    size_threshold: u64,
    time_format: Option<String>,
    utc: bool,
}

impl RotationPolicy {
    pub fn new(size_threshold: u64, time_format: Option<String>, utc: bool) -> Self {
        Self {
            size_threshold,
            time_format,
            utc,
        }
    }

    pub fn from_config(config: &RotationConfig) -> Self {
        Self::new(
            config.size_threshold_bytes,
            config.resolved_time_format(),
            config.utc,
        )
    }

    /// True when neither trigger is configured
    pub fn is_disabled(&self) -> bool {
        self.size_threshold == 0 && self.time_format.is_none()
    }

    pub fn size_rotation_enabled(&self) -> bool {
        self.size_threshold > 0
    }

    /// Name of the time bucket `instant` falls into, `None` without a time format
    pub fn bucket(&self, instant: DateTime<Utc>) -> Option<String> {
        let format = self.time_format.as_deref()?;
        let mut name = String::new();
        // An unvalidated pattern fails here instead of panicking in to_string
        let written = if self.utc {
            write!(name, "{}", instant.format(format))
        } else {
            write!(name, "{}", instant.with_timezone(&Local).format(format))
        };
        written.ok().map(|_| name)
    }

    /// Decide whether the active file must rotate before `record_time` is written
    pub fn decide(&self, stat: &FileStat, record_time: DateTime<Utc>) -> RotationDecision {
        let by_time = match (self.bucket(stat.modified), self.bucket(record_time)) {
            (Some(file_bucket), Some(record_bucket)) => file_bucket != record_bucket,
            _ => false,
        };
        let by_size = self.size_threshold > 0 && stat.size >= self.size_threshold;

        RotationDecision { by_time, by_size }
    }

    /// Compute the path the active file is renamed to
    ///
    /// The time bucket comes from the file's own modification time so the
    /// archive is named after the period its content belongs to. With size
    /// rotation enabled, or when the bucketed name is already taken, a
    /// sequence number is probed from the cursor upwards.
    pub fn archive_path(
        &self,
        base: &Path,
        modified: DateTime<Utc>,
        cursor: &mut SequenceCursor,
    ) -> PathBuf {
        let stem = match self.bucket(modified) {
            Some(bucket) => with_suffix(base, &bucket),
            None => base.to_path_buf(),
        };

        if !self.size_rotation_enabled() && stem != base && !is_taken(&stem) {
            return stem;
        }

        let mut number = cursor.start_for(&stem);
        loop {
            let candidate = with_suffix(&stem, &number.to_string());
            if !is_taken(&candidate) {
                cursor.record(&stem, number);
                return candidate;
            }
            number += 1;
        }
    }
}

/// Append `"." + suffix` to the final component of `path`
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

// A name is taken if it or its compressed sibling exists
fn is_taken(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
        || with_suffix(path, COMPRESSED_EXTENSION)
            .symlink_metadata()
            .is_ok()
}

// Config module - Rotation and retention settings

use crate::error::{Result, RotalogError};
use chrono::format::{Item, StrftimeItems};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

pub const KB: u64 = 1024;
pub const MB: u64 = KB * KB;
pub const GB: u64 = MB * KB;
pub const TB: u64 = GB * KB;

/// Daily buckets
pub const DAY_FORMAT: &str = "%Y-%m-%d";
/// Hourly buckets
pub const HOUR_FORMAT: &str = "%Y-%m-%d-%H";
/// Per-minute buckets
pub const MINUTE_FORMAT: &str = "%Y-%m-%d-%H-%M";

/// Rotation and retention configuration for a [`RotatingWriter`](crate::logs::RotatingWriter)
///
/// Every threshold is disabled by its zero value. With both
/// `size_threshold_bytes` and `time_format` disabled the writer never
/// rotates and behaves as a plain append-only file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Rotate once the active file reaches this many bytes (0 = disabled)
    #[serde(default)]
    pub size_threshold_bytes: u64,

    /// Time bucket pattern, strftime or a named granularity (empty = disabled)
    #[serde(default)]
    pub time_format: String,

    /// Delete archives older than this many seconds (0 = disabled)
    #[serde(default)]
    pub max_age_secs: u64,

    /// Keep at most this many archives (0 = disabled)
    #[serde(default)]
    pub max_count: usize,

    /// Gzip each archive right after rotation
    #[serde(default)]
    pub compress: bool,

    /// Compute time buckets in UTC instead of local time
    #[serde(default)]
    pub utc: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            size_threshold_bytes: 0,
            time_format: String::new(),
            max_age_secs: 0,
            max_count: 0,
            compress: false,
            utc: false,
        }
    }
}

impl RotationConfig {
    /// Rotate when the active file reaches `bytes`
    pub fn rotation_size(mut self, bytes: u64) -> Self {
        self.size_threshold_bytes = bytes;
        self
    }

    /// Keep at most `count` archives
    pub fn rotation_count(mut self, count: usize) -> Self {
        self.max_count = count;
        self
    }

    /// Delete archives older than `max_age`
    ///
    /// Partial seconds round up so a non-zero age never disables the limit.
    pub fn rotation_max_age(mut self, max_age: Duration) -> Self {
        let partial = u64::from(max_age.subsec_nanos() > 0);
        self.max_age_secs = max_age.as_secs().saturating_add(partial);
        self
    }

    /// Rotate when a record falls into a different time bucket
    ///
    /// Accepts a strftime pattern or one of `day`, `hour`, `minute` and
    /// their `YYYY-MM-DD` style spellings.
    pub fn rotation_format(mut self, pattern: impl Into<String>) -> Self {
        self.time_format = pattern.into();
        self
    }

    /// Compress archives after rotation
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Bucket timestamps in UTC
    pub fn utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Get max age as Duration
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// The strftime pattern used for time buckets, `None` when time rotation is disabled
    pub fn resolved_time_format(&self) -> Option<String> {
        resolve_time_format(&self.time_format)
    }

    /// Whether any rotation trigger is configured
    pub fn rotation_enabled(&self) -> bool {
        self.size_threshold_bytes > 0 || self.resolved_time_format().is_some()
    }

    /// Whether the retention sweep has anything to enforce
    pub fn retention_enabled(&self) -> bool {
        self.max_age_secs > 0 || self.max_count > 0
    }

    /// Load a rotation configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<RotationConfig> {
        // Read file contents
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RotalogError::ConfigError(format!("Failed to read config file: {}", e)))?;

        // Determine format based on file extension
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(RotalogError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse TOML configuration, either top-level or under a `[rotation]` table
    fn parse_toml(contents: &str) -> Result<RotationConfig> {
        #[derive(Deserialize)]
        struct ConfigFile {
            rotation: Option<RotationConfig>,
            #[serde(flatten)]
            inline: RotationConfig,
        }

        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| RotalogError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        Ok(file.rotation.unwrap_or(file.inline))
    }

    /// Parse JSON configuration
    fn parse_json(contents: &str) -> Result<RotationConfig> {
        serde_json::from_str(contents)
            .map_err(|e| RotalogError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(pattern) = self.resolved_time_format() {
            let items: Vec<Item<'_>> = StrftimeItems::new(&pattern).collect();
            if items.iter().any(|item| matches!(item, Item::Error)) {
                return Err(RotalogError::InvalidTimeFormat(self.time_format.clone()));
            }

            // A pattern without any field never changes, so it can't bucket anything
            let has_field = items
                .iter()
                .any(|item| matches!(item, Item::Numeric(..) | Item::Fixed(_)));
            if !has_field {
                return Err(RotalogError::InvalidTimeFormat(format!(
                    "{} contains no date or time field",
                    self.time_format
                )));
            }

            // Bucket names become part of a file name, so check what the pattern expands to
            let sample = Utc
                .with_ymd_and_hms(2024, 12, 31, 23, 59, 59)
                .single()
                .unwrap_or_default();
            let mut bucket = String::new();
            write!(bucket, "{}", sample.format(&pattern))
                .map_err(|_| RotalogError::InvalidTimeFormat(self.time_format.clone()))?;
            if bucket.contains(&['/', '\\', std::path::MAIN_SEPARATOR][..]) {
                return Err(RotalogError::ConfigValidationError(format!(
                    "time_format must not produce path separators: {} gives {}",
                    self.time_format, bucket
                )));
            }
        }

        if self.max_count > 0 && !self.rotation_enabled() {
            tracing::debug!("max_count is set but no rotation trigger is configured");
        }

        Ok(())
    }
}

/// Map a configured pattern onto a strftime pattern
///
/// Named granularities and `YYYY-MM-DD` style templates are translated;
/// anything else is taken as strftime already.
pub fn resolve_time_format(pattern: &str) -> Option<String> {
    let trimmed = pattern.trim();
    let resolved = match trimmed {
        "" => return None,
        "day" | "daily" | "YYYY-MM-DD" => DAY_FORMAT,
        "hour" | "hourly" | "YYYY-MM-DD-HH" => HOUR_FORMAT,
        "minute" | "YYYY-MM-DD-HH-mm" => MINUTE_FORMAT,
        other => other,
    };
    Some(resolved.to_string())
}

/// Parse a human readable size such as `512`, `64KB`, `10M` or `1GB`
pub fn parse_size(input: &str) -> Result<u64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| RotalogError::InvalidSize(input.to_string()))?;

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => KB,
        "M" | "MB" => MB,
        "G" | "GB" => GB,
        "T" | "TB" => TB,
        _ => return Err(RotalogError::InvalidSize(input.to_string())),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| RotalogError::InvalidSize(input.to_string()))
}

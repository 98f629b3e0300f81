use thiserror::Error;

/// Main error type for the rotating log writer
#[derive(Debug, Error)]
pub enum RotalogError {
    // Active file errors
    #[error("Failed to open log file: {0}")]
    LogFileError(String),

    #[error("Failed to create log directory: {0}")]
    DirectoryError(String),

    #[error("Log writer is closed")]
    WriterClosed,

    // Rotation errors (never surfaced by a write)
    #[error("Log rotation failed: {0}")]
    LogRotationError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("Invalid time format pattern: {0}")]
    InvalidTimeFormat(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RotalogError {
    /// Whether the error must abort the write that produced it.
    ///
    /// Rotation errors degrade to "no rotation this call"; everything else
    /// reaches the caller.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RotalogError::LogRotationError(_))
    }
}

/// Result type alias for rotalog operations
pub type Result<T> = std::result::Result<T, RotalogError>;

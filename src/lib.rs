// Library exports for rotalog

pub mod cli;
pub mod config;
pub mod error;
pub mod logs;

pub use config::RotationConfig;
pub use error::{Result, RotalogError};
pub use logs::{RecordSink, RetentionSweeper, RotatingWriter};

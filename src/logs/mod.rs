// Logs module - Rotating log files and archive retention

mod policy;
mod retention;
mod sink;
mod writer;

pub use policy::{FileStat, RotationDecision, RotationPolicy, SequenceCursor, COMPRESSED_EXTENSION};
pub use retention::{ArchiveEntry, Compressor, GzipCompressor, RetentionSweeper, SweepReport};
pub use sink::RecordSink;
pub use writer::RotatingWriter;

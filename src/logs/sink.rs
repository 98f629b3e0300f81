use crate::error::Result;
use crate::logs::RotatingWriter;
use chrono::{DateTime, Utc};
use std::io;
use tracing_subscriber::fmt::MakeWriter;

/// Anything that accepts fully formatted records stamped with their logical time
///
/// This is the seam a logging facade targets; the timestamp drives time
/// based rotation independently of when the call happens.
pub trait RecordSink: Send + Sync {
    /// Persist `record`, returning the number of bytes written
    fn write_record(&self, record: &[u8], timestamp: DateTime<Utc>) -> Result<usize>;

    /// Flush buffered data to the operating system
    fn flush(&self) -> Result<()>;
}

// Byte-stream callers have no logical time, so records are stamped on arrival.
impl io::Write for &RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_record(buf, Utc::now())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        RotatingWriter::flush(self).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = &'a RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RotationConfig;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_io_write_adapter() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let writer = RotatingWriter::open(&path, RotationConfig::default()).unwrap();

        let mut handle = &writer;
        writeln!(handle, "hello {}", 42).unwrap();
        handle.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello 42\n");
    }

    #[test]
    fn test_record_sink_as_trait_object() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        let sink: Arc<dyn RecordSink> =
            Arc::new(RotatingWriter::open(&path, RotationConfig::default()).unwrap());

        assert_eq!(sink.write_record(b"via trait\n", Utc::now()).unwrap(), 10);
        sink.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "via trait\n");
    }

    #[test]
    fn test_tracing_subscriber_writes_through() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trace.log");
        let writer = Arc::new(RotatingWriter::open(&path, RotationConfig::default()).unwrap());

        let subscriber = tracing_subscriber::fmt()
            .with_writer(Arc::clone(&writer))
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("routed through the rotating writer");
        });

        let mut direct = RotatingWriter::make_writer(&writer);
        direct.write_all(b"direct line\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("routed through the rotating writer"));
        assert!(content.ends_with("direct line\n"));
        assert!(content.contains("INFO"));
    }
}

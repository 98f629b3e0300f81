// CLI module - Pipe stdin into a rotating log file

mod output;

pub use output::{print_error, PipeStats};

use crate::config::{parse_size, RotationConfig};
use crate::error::{Result, RotalogError};
use crate::logs::RotatingWriter;
use chrono::Utc;
use clap::Parser;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Lines buffered between the stdin reader and the file writer
const LINE_BUFFER: usize = 1024;

/// rotalog - Append stdin to a log file with size and time based rotation
#[derive(Parser, Debug)]
#[command(name = "rotalog")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Active log file path
    path: PathBuf,

    /// Load rotation settings from a TOML or JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rotate when the file reaches this size (e.g. 512, 64KB, 10MB)
    #[arg(short, long)]
    size: Option<String>,

    /// Time bucket: day, hour, minute or a strftime pattern
    #[arg(short, long)]
    format: Option<String>,

    /// Delete archives older than this many seconds
    #[arg(long)]
    max_age_secs: Option<u64>,

    /// Keep at most this many archives
    #[arg(long)]
    max_count: Option<usize>,

    /// Gzip archives after rotation
    #[arg(long)]
    compress: bool,

    /// Compute time buckets in UTC
    #[arg(long)]
    utc: bool,

    /// Echo every line to stdout as well
    #[arg(long)]
    tee: bool,
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        block_on_detached(runtime, cli.execute())
    }

    /// Merge the config file (if any) with command-line overrides
    pub fn build_config(&self) -> Result<RotationConfig> {
        let mut config = match &self.config {
            Some(path) => RotationConfig::from_file(path)?,
            None => RotationConfig::default(),
        };

        if let Some(size) = &self.size {
            config = config.rotation_size(parse_size(size)?);
        }
        if let Some(format) = &self.format {
            config = config.rotation_format(format.clone());
        }
        if let Some(secs) = self.max_age_secs {
            config.max_age_secs = secs;
        }
        if let Some(count) = self.max_count {
            config = config.rotation_count(count);
        }
        if self.compress {
            config = config.compress(true);
        }
        if self.utc {
            config = config.utc(true);
        }

        config.validate()?;
        Ok(config)
    }

    /// Read stdin until EOF or Ctrl-C, writing each line to the log
    async fn execute(self) -> Result<()> {
        let config = self.build_config()?;
        let writer = Arc::new(RotatingWriter::open(&self.path, config)?);
        info!("Writing to {}", writer.path().display());

        let (tx, rx) = mpsc::channel::<String>(LINE_BUFFER);
        let sink = Arc::clone(&writer);
        let tee = self.tee;
        let persist = tokio::task::spawn_blocking(move || persist_lines(&sink, rx, tee));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            // Writer side stopped on an error
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Interrupted, closing log");
                    break;
                }
            }
        }

        drop(tx);
        let outcome = persist
            .await
            .map_err(|e| RotalogError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

        writer.close()?;
        writer.wait_for_retention();

        let mut stats = outcome?;
        stats.rotations = writer.rotation_count();
        output::print_summary(writer.path(), &stats);
        Ok(())
    }
}

/// Drive `future` to completion, then drop the runtime without waiting on
/// blocking work
///
/// A stdin read left pending by Ctrl-C can't be cancelled; dropping the
/// runtime normally would wait for the next line of input.
fn block_on_detached<F>(runtime: Runtime, future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let result = runtime.block_on(future);
    runtime.shutdown_background();
    result
}

/// Drain the channel into the writer, one record per line
fn persist_lines(
    writer: &RotatingWriter,
    mut rx: mpsc::Receiver<String>,
    tee: bool,
) -> Result<PipeStats> {
    let mut stats = PipeStats::default();

    while let Some(line) = rx.blocking_recv() {
        if tee {
            println!("{}", line);
        }

        let mut record = line.into_bytes();
        record.push(b'\n');

        match writer.write_record(&record, Utc::now()) {
            Ok(written) => {
                stats.records += 1;
                stats.bytes += written as u64;
            }
            Err(e) => {
                error!("Failed to write log record: {}", e);
                return Err(e);
            }
        }
    }

    writer.flush()?;
    Ok(stats)
}

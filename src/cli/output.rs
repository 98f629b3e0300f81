// Output formatting for the CLI

use crate::config::{GB, KB, MB};
use colored::*;
use std::path::Path;

/// Totals gathered while piping stdin into the writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeStats {
    pub records: u64,
    pub bytes: u64,
    pub rotations: u64,
}

/// Print the end-of-run summary to stderr
pub fn print_summary(path: &Path, stats: &PipeStats) {
    eprintln!("{}", "✓ Log stream closed".green().bold());
    eprintln!("  {}: {}", "File".bold(), path.display().to_string().cyan());
    eprintln!("  {}: {}", "Records".bold(), stats.records);
    eprintln!("  {}: {}", "Written".bold(), format_bytes(stats.bytes));
    eprintln!("  {}: {}", "Rotations".bold(), stats.rotations);
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Format a byte count for humans
pub fn format_bytes(bytes: u64) -> String {
    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

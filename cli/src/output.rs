//! Formatting helpers for CLI output.

use std::time::Duration;

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Seconds with millisecond precision, e.g. `1.250s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

/// One-line extraction report: size, time and throughput.
pub fn format_extract_summary(bytes: u64, elapsed: Duration, bytes_per_sec: u64) -> String {
    format!(
        "Extracted {} in {} ({}/s)",
        format_bytes(bytes),
        format_elapsed(elapsed),
        format_bytes(bytes_per_sec)
    )
}

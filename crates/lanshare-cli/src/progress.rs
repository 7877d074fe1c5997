//! Terminal progress display.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const BAR_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Byte progress bar for one transfer
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Bar sized to `total_bytes`
    #[must_use]
    pub fn new(total_bytes: u64, label: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Move to `bytes`; never moves backwards
    pub fn update(&self, bytes: u64) {
        if bytes > self.bar.position() {
            self.bar.set_position(bytes);
        }
    }

    /// Fill the bar and replace the label
    pub fn finish(&self, msg: String) {
        self.bar.set_position(self.bar.length().unwrap_or(0));
        self.bar.finish_with_message(msg);
    }

    /// Leave the bar where it stopped (for errors)
    pub fn abandon(&self, msg: String) {
        self.bar.abandon_with_message(msg);
    }
}

/// Spinner for open-ended waits
#[must_use]
pub fn spinner(msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message(msg.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Format bytes in human-readable format
///
/// # Example
///
/// ```text
/// format_bytes(1024)            -> "1.00 KB"
/// format_bytes(10 * 1024 * 1024) -> "10.00 MB"
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

/// Average rate over `elapsed`, e.g. `"12.40 MB/s"`
#[must_use]
pub fn format_rate(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return "-".to_string();
    }
    format!("{}/s", format_bytes((bytes as f64 / secs) as u64))
}

/// Format a duration as `30s`, `1m 30s` or `1h 1m`
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

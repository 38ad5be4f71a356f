//! Progress bar and summary reporting for CLI transfers.

use console::style;
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};

use crate::{Error, Progress, TransferId, TransferKind, TransferProgress, TransferStats};

/// Renders one transfer as an `indicatif` bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// Creates a bar labelled with `name`. The length is filled in once the
    /// total size is known.
    pub fn new(name: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec} - {msg}",
            )
            .expect("progress template is valid")
            .progress_chars("━━╌"),
        );
        bar.set_message(name.to_string());
        Self { bar }
    }
}

impl TransferProgress for BarProgress {
    fn on_start(&self, id: TransferId, kind: TransferKind) {
        log::info!("[{id}] {kind} started");
        self.bar
            .enable_steady_tick(std::time::Duration::from_millis(250));
    }

    fn on_progress(&self, _id: TransferId, progress: Progress, _speed: u64) {
        if progress.expected > 0 {
            self.bar.set_length(progress.expected);
        }
        self.bar.set_position(progress.transferred);
    }

    fn on_complete(&self, _id: TransferId, _stats: &TransferStats) {
        self.bar.finish_and_clear();
    }

    fn on_error(&self, _id: TransferId, _error: &Error) {
        self.bar.abandon();
    }
}

/// Prints a one-line summary of a finished transfer.
pub fn print_summary(kind: TransferKind, target: &str, stats: &TransferStats) {
    println!(
        "{} {kind} {target}: {} in {} ({}/s avg, {}/s peak)",
        style("✔").green().bold(),
        HumanBytes(stats.bytes),
        HumanDuration(stats.elapsed),
        HumanBytes(stats.average_speed),
        HumanBytes(stats.peak_speed),
    );
}

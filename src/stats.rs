//! Transfer statistics.

use std::time::{Duration, Instant};

use crate::event::Progress;

/// Statistics for a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStats {
    /// Bytes moved, as last reported by a progress event.
    pub bytes: u64,
    /// Time from the start of observation to completion.
    pub elapsed: Duration,
    /// Average speed in bytes per second.
    pub average_speed: u64,
    /// Peak speed in bytes per second, measured between progress events.
    pub peak_speed: u64,
    /// Number of progress events observed.
    pub progress_events: usize,
}

impl TransferStats {
    /// Computes the average speed for `bytes` moved in `elapsed`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn speed(bytes: u64, elapsed: Duration) -> u64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            (bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Tracks throughput while a transfer stream is drained.
pub(crate) struct SpeedTracker {
    start_time: Instant,
    last_at: Instant,
    last_bytes: u64,
    peak_speed: u64,
    events: usize,
}

impl SpeedTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_at: now,
            last_bytes: 0,
            peak_speed: 0,
            events: 0,
        }
    }

    /// Records a progress event and returns the speed since the previous one.
    pub fn record(&mut self, progress: Progress) -> u64 {
        self.record_at(progress, Instant::now())
    }

    fn record_at(&mut self, progress: Progress, now: Instant) -> u64 {
        self.events += 1;
        let delta = progress.transferred.saturating_sub(self.last_bytes);
        let speed = TransferStats::speed(delta, now.saturating_duration_since(self.last_at));
        self.peak_speed = self.peak_speed.max(speed);
        self.last_bytes = progress.transferred.max(self.last_bytes);
        self.last_at = now;
        speed
    }

    pub fn finish(self) -> TransferStats {
        let elapsed = self.start_time.elapsed();
        TransferStats {
            bytes: self.last_bytes,
            elapsed,
            average_speed: TransferStats::speed(self.last_bytes, elapsed),
            peak_speed: self.peak_speed,
            progress_events: self.events,
        }
    }
}

//! Live byte counters shared between a transport and its observer.

use std::sync::Arc;

use tokio::sync::watch;

use crate::event::Progress;

/// Writer half of a transfer's counters, handed to the [`Transport`](crate::Transport).
///
/// Cloning is cheap; all clones feed the same counters. The counters close once
/// every clone has been dropped.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    expected: Arc<watch::Sender<u64>>,
    transferred: Arc<watch::Sender<u64>>,
}

/// Reader half of a transfer's counters.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    /// Total bytes anticipated.
    pub expected: watch::Receiver<u64>,
    /// Bytes moved so far.
    pub transferred: watch::Receiver<u64>,
}

impl ProgressCounters {
    /// Current values without marking them as seen.
    #[must_use]
    pub fn snapshot(&self) -> Progress {
        Progress::new(*self.transferred.borrow(), *self.expected.borrow())
    }
}

impl ProgressSink {
    /// Creates a fresh pair of counters, both starting at zero.
    #[must_use]
    pub fn channel() -> (Self, ProgressCounters) {
        let (expected_tx, expected_rx) = watch::channel(0);
        let (transferred_tx, transferred_rx) = watch::channel(0);
        (
            Self {
                expected: Arc::new(expected_tx),
                transferred: Arc::new(transferred_tx),
            },
            ProgressCounters {
                expected: expected_rx,
                transferred: transferred_rx,
            },
        )
    }

    /// Publishes the total size of the transfer.
    ///
    /// Observers are notified even when the value equals the current one, so
    /// a known total of zero is still announced.
    pub fn set_expected(&self, total: u64) {
        self.expected.send_modify(|v| *v = total);
    }

    /// Adds `delta` bytes to the transferred counter.
    pub fn advance(&self, delta: u64) {
        self.transferred.send_if_modified(|v| {
            if delta == 0 {
                return false;
            }
            *v = v.saturating_add(delta);
            true
        });
    }

    /// Records a cumulative byte count.
    ///
    /// Reports may arrive out of order from parallel writers, so the counter
    /// keeps the high-water mark and never moves backwards.
    pub fn record(&self, cumulative: u64) {
        self.transferred.send_if_modified(|v| {
            if cumulative > *v {
                *v = cumulative;
                true
            } else {
                false
            }
        });
    }

    /// Bytes reported so far.
    #[must_use]
    pub fn transferred(&self) -> u64 {
        *self.transferred.borrow()
    }
}

//! Event types emitted by a transfer stream.

use std::fmt;

use reqwest::StatusCode;

/// Unique identifier of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(uuid::Uuid);

impl TransferId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The short form is enough to tell concurrent transfers apart in logs.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// The three supported transfer shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// GET-style request whose response body is fetched into memory.
    Download,
    /// Request with an in-memory body; yields the response body.
    Upload,
    /// Request whose body is streamed from a file; yields the file path.
    FileUpload,
}

impl TransferKind {
    /// Returns true if `status` counts as success for this kind of transfer.
    ///
    /// Downloads accept exactly `200 OK`; uploads accept anything in `200..=399`.
    #[must_use]
    pub fn accepts(self, status: StatusCode) -> bool {
        match self {
            Self::Download => status == StatusCode::OK,
            Self::Upload | Self::FileUpload => (200..=399).contains(&status.as_u16()),
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Download => "download",
            Self::Upload => "upload",
            Self::FileUpload => "file upload",
        })
    }
}

/// Cumulative byte counts of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Bytes moved so far.
    pub transferred: u64,
    /// Total bytes anticipated; `0` while unknown.
    pub expected: u64,
}

impl Progress {
    /// Creates a progress value.
    #[must_use]
    pub const fn new(transferred: u64, expected: u64) -> Self {
        Self {
            transferred,
            expected,
        }
    }

    /// Completed fraction in `0.0..=1.0`, or `None` while the total is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        (self.expected > 0).then(|| (self.transferred as f64 / self.expected as f64).min(1.0))
    }
}

/// An item of a transfer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent<T> {
    /// Byte counters changed.
    Progress(Progress),
    /// The transfer succeeded. Always the last event.
    Complete(T),
}

impl<T> TransferEvent<T> {
    /// Returns the progress carried by this event, if any.
    #[must_use]
    pub const fn progress(&self) -> Option<Progress> {
        match self {
            Self::Progress(p) => Some(*p),
            Self::Complete(_) => None,
        }
    }

    /// Returns true for [`TransferEvent::Complete`].
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_accepts_only_ok() {
        assert!(TransferKind::Download.accepts(StatusCode::OK));
        assert!(!TransferKind::Download.accepts(StatusCode::CREATED));
        assert!(!TransferKind::Download.accepts(StatusCode::NOT_FOUND));
    }

    #[test]
    fn uploads_accept_success_and_redirect_range() {
        for kind in [TransferKind::Upload, TransferKind::FileUpload] {
            assert!(kind.accepts(StatusCode::OK));
            assert!(kind.accepts(StatusCode::CREATED));
            assert!(kind.accepts(StatusCode::PERMANENT_REDIRECT));
            assert!(!kind.accepts(StatusCode::BAD_REQUEST));
            assert!(!kind.accepts(StatusCode::INTERNAL_SERVER_ERROR));
            assert!(!kind.accepts(StatusCode::CONTINUE));
        }
    }

    #[test]
    fn fraction_handles_unknown_total() {
        assert_eq!(Progress::new(10, 0).fraction(), None);
        assert_eq!(Progress::new(50, 200).fraction(), Some(0.25));
        assert_eq!(Progress::new(300, 200).fraction(), Some(1.0));
    }

    #[test]
    fn transfer_ids_are_unique() {
        let a = TransferId::new();
        let b = TransferId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 8);
    }

    #[test]
    fn event_accessors() {
        let progress: TransferEvent<()> = TransferEvent::Progress(Progress::new(1, 2));
        assert_eq!(progress.progress(), Some(Progress::new(1, 2)));
        assert!(!progress.is_complete());
        assert!(TransferEvent::Complete(()).is_complete());
    }
}

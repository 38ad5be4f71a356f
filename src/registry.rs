//! Arena of in-flight transfers keyed by [`TransferId`].
//!
//! Each running transfer holds a [`Registration`] for as long as its task
//! lives; dropping it removes the entry, so the registry only ever contains
//! transfers whose streams have not terminated yet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::event::{Progress, TransferId, TransferKind};
use crate::progress::ProgressCounters;

/// Snapshot of one in-flight transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTransfer {
    /// Transfer identifier.
    pub id: TransferId,
    /// Transfer kind.
    pub kind: TransferKind,
    /// Target URL.
    pub url: Url,
    /// Counters at the time of the snapshot.
    pub progress: Progress,
}

struct Entry {
    kind: TransferKind,
    url: Url,
    counters: ProgressCounters,
    cancel: CancellationToken,
}

impl Entry {
    fn snapshot(&self, id: TransferId) -> ActiveTransfer {
        ActiveTransfer {
            id,
            kind: self.kind,
            url: self.url.clone(),
            progress: self.counters.snapshot(),
        }
    }
}

/// Shared registry of in-flight transfers. Clones share the same entries.
#[derive(Clone, Default)]
pub struct TransferRegistry {
    entries: Arc<Mutex<HashMap<TransferId, Entry>>>,
}

impl std::fmt::Debug for TransferRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRegistry")
            .field("active", &self.len())
            .finish()
    }
}

impl TransferRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TransferId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(
        &self,
        id: TransferId,
        kind: TransferKind,
        url: Url,
        counters: ProgressCounters,
        cancel: CancellationToken,
    ) -> Registration {
        self.lock().insert(
            id,
            Entry {
                kind,
                url,
                counters,
                cancel,
            },
        );
        Registration {
            id,
            registry: self.clone(),
        }
    }

    /// Lists in-flight transfers.
    #[must_use]
    pub fn active(&self) -> Vec<ActiveTransfer> {
        self.lock()
            .iter()
            .map(|(id, entry)| entry.snapshot(*id))
            .collect()
    }

    /// Returns a snapshot of one transfer, if it is still in flight.
    #[must_use]
    pub fn get(&self, id: TransferId) -> Option<ActiveTransfer> {
        self.lock().get(&id).map(|entry| entry.snapshot(id))
    }

    /// Cancels a transfer. Returns false if it already terminated.
    ///
    /// A cancelled transfer whose stream is still observed terminates with
    /// [`Error::Cancelled`](crate::Error::Cancelled).
    pub fn cancel(&self, id: TransferId) -> bool {
        self.lock().get(&id).is_some_and(|entry| {
            entry.cancel.cancel();
            true
        })
    }

    /// Cancels every in-flight transfer and returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let entries = self.lock();
        for entry in entries.values() {
            entry.cancel.cancel();
        }
        entries.len()
    }

    /// Number of in-flight transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Keeps a transfer listed in its registry until dropped.
pub(crate) struct Registration {
    id: TransferId,
    registry: TransferRegistry,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

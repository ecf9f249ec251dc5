//! # Transfer Registry
//!
//! Bookkeeping for in-flight downloads. Each transfer is registered with its
//! callbacks and a cancellation token; completion or cancellation removes the
//! entry, so at most one of the two ever observes it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::DownloadError;
use crate::cache::FileWatch;

/// Receives a completion fraction in `[0, 1]`
pub type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Receives the final outcome of a transfer, at most once. The file is
/// claimed for the receiver; dropping the watch releases it.
pub type CompletionCallback = Box<dyn FnOnce(Result<FileWatch, DownloadError>) + Send>;

/// Identifier of a registered transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct TransferEntry {
    url: Url,
    on_progress: Option<ProgressCallback>,
    on_complete: CompletionCallback,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    next_id: AtomicU64,
    transfers: Mutex<HashMap<TransferId, TransferEntry>>,
}

/// Table of active transfers
#[derive(Clone, Default)]
pub struct TransferRegistry {
    state: Arc<RegistryState>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new transfer. Returns its id and the token the download task
    /// should watch for cancellation.
    pub fn register(
        &self,
        url: Url,
        on_progress: Option<ProgressCallback>,
        on_complete: CompletionCallback,
    ) -> (TransferId, CancellationToken) {
        let id = TransferId(self.state.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let cancel = CancellationToken::new();
        debug!(transfer = %id, %url, "Transfer registered");
        self.state.transfers.lock().insert(
            id,
            TransferEntry {
                url,
                on_progress,
                on_complete,
                cancel: cancel.clone(),
            },
        );
        (id, cancel)
    }

    /// Forward progress to the transfer's observer, if it is still active
    pub fn report_progress(&self, id: TransferId, fraction: f32) {
        let callback = {
            let transfers = self.state.transfers.lock();
            transfers.get(&id).and_then(|entry| entry.on_progress.clone())
        };
        if let Some(callback) = callback {
            trace!(transfer = %id, fraction, "Transfer progress");
            callback(fraction.clamp(0.0, 1.0));
        }
    }

    pub fn is_active(&self, id: TransferId) -> bool {
        self.state.transfers.lock().contains_key(&id)
    }

    /// Deliver the outcome and forget the transfer.
    ///
    /// Returns `false` if the transfer was already completed or cancelled, in
    /// which case nothing is delivered.
    pub fn complete(&self, id: TransferId, result: Result<FileWatch, DownloadError>) -> bool {
        let entry = self.state.transfers.lock().remove(&id);
        match entry {
            Some(entry) => {
                debug!(transfer = %id, url = %entry.url, ok = result.is_ok(), "Transfer completed");
                (entry.on_complete)(result);
                true
            }
            None => {
                trace!(transfer = %id, "Completion for inactive transfer dropped");
                false
            }
        }
    }

    /// Cancel a transfer. Its completion callback is never invoked.
    ///
    /// Returns `false` if the transfer was not active.
    pub fn cancel(&self, id: TransferId) -> bool {
        let entry = self.state.transfers.lock().remove(&id);
        match entry {
            Some(entry) => {
                debug!(transfer = %id, url = %entry.url, "Transfer cancelled");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.state.transfers.lock().len()
    }
}

/// Caller-side reference to a fetch.
///
/// A fetch answered from the cache returns a no-op handle: there is nothing
/// to cancel.
#[derive(Clone)]
pub struct TransferHandle {
    id: Option<TransferId>,
    registry: Option<TransferRegistry>,
}

impl TransferHandle {
    pub(crate) fn new(id: TransferId, registry: TransferRegistry) -> Self {
        Self {
            id: Some(id),
            registry: Some(registry),
        }
    }

    pub(crate) fn noop() -> Self {
        Self {
            id: None,
            registry: None,
        }
    }

    pub fn id(&self) -> Option<TransferId> {
        self.id
    }

    pub fn is_noop(&self) -> bool {
        self.id.is_none()
    }

    /// Whether the transfer is still running
    pub fn is_active(&self) -> bool {
        match (&self.registry, self.id) {
            (Some(registry), Some(id)) => registry.is_active(id),
            _ => false,
        }
    }

    /// Cancel the transfer. Has no effect once it has completed.
    pub fn cancel(&self) -> bool {
        match (&self.registry, self.id) {
            (Some(registry), Some(id)) => registry.cancel(id),
            _ => false,
        }
    }
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InUseRegistry;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn url() -> Url {
        Url::parse("https://example.com/a.png").unwrap()
    }

    #[test]
    fn test_complete_delivers_once() {
        let registry = TransferRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let (id, _token) = registry.register(
            url(),
            None,
            Box::new(move |result: Result<FileWatch, DownloadError>| {
                assert!(result.is_ok());
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let files = InUseRegistry::new();
        assert!(registry.is_active(id));
        assert!(registry.complete(id, Ok(files.watch("/tmp/x"))));
        assert!(!registry.complete(id, Ok(files.watch("/tmp/x"))));
        // the undelivered claim is released
        assert_eq!(files.watcher_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_cancel_suppresses_completion() {
        let registry = TransferRegistry::new();
        let delivered = Arc::new(AtomicBool::new(false));
        let flag = delivered.clone();
        let (id, token) = registry.register(
            url(),
            None,
            Box::new(move |_| flag.store(true, Ordering::SeqCst)),
        );

        assert!(registry.cancel(id));
        assert!(token.is_cancelled());
        assert!(!registry.is_active(id));
        assert!(!registry.complete(id, Err(DownloadError::Cancelled)));
        assert!(!registry.cancel(id));
        assert!(!delivered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_progress_only_while_active() {
        let registry = TransferRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let (id, _token) = registry.register(
            url(),
            Some(Arc::new(move |p: f32| seen_clone.lock().push(p))),
            Box::new(|_| {}),
        );

        registry.report_progress(id, 0.25);
        registry.report_progress(id, 1.5);
        registry.complete(id, Err(DownloadError::Cancelled));
        registry.report_progress(id, 0.75);

        assert_eq!(*seen.lock(), vec![0.25, 1.0]);
    }

    #[test]
    fn test_handles() {
        let registry = TransferRegistry::new();
        let (id, _token) = registry.register(url(), None, Box::new(|_| {}));
        let handle = TransferHandle::new(id, registry.clone());
        assert!(!handle.is_noop());
        assert!(handle.is_active());
        assert!(handle.cancel());
        assert!(!handle.is_active());

        let noop = TransferHandle::noop();
        assert!(noop.is_noop());
        assert!(!noop.cancel());
    }
}

//! # Resource Items
//!
//! A [`ResourceItem`] is the per-resource state machine consumers hold on to.
//! It drives the [`FileDownloader`] for one key, reports
//! `NotLoaded -> Loading -> Loaded` transitions and progress to its
//! observers, and follows its backing file when the cache relocates it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::cache::FileWatch;
use crate::decoder::{BytesDecoder, Decoder, SizeHint};
use crate::downloader::{FileDownloader, resource_key};
use crate::transfer::TransferHandle;
use crate::{DecodeError, DecodeFailurePolicy, DownloadError, ItemError};

/// Lifecycle of a resource item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
}

/// Receives state and progress notifications from a [`ResourceItem`]
pub trait ItemObserver: Send + Sync {
    fn on_state_changed(&self, _key: &str, _state: LoadState) {}

    fn on_progress(&self, _key: &str, _fraction: f32) {}
}

/// Registration returned by [`ResourceItem::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Waiter = oneshot::Sender<Result<PathBuf, ItemError>>;

#[derive(Default)]
struct Slot {
    /// Bumped by every load attempt; completions of older attempts are ignored
    generation: u64,
    transfer: Option<TransferHandle>,
    file: Option<FileWatch>,
    waiters: Vec<Waiter>,
}

struct ItemInner<D> {
    key: String,
    downloader: FileDownloader,
    decoder: Arc<D>,
    policy: DecodeFailurePolicy,
    state: watch::Sender<LoadState>,
    slot: Mutex<Slot>,
    observers: Mutex<Vec<(ObserverId, Arc<dyn ItemObserver>)>>,
    next_observer: AtomicU64,
}

/// Handle to one remote resource. Clones share state.
pub struct ResourceItem<D: Decoder = BytesDecoder> {
    inner: Arc<ItemInner<D>>,
}

impl<D: Decoder> Clone for ResourceItem<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Decoder> ResourceItem<D> {
    pub fn new(
        key: impl Into<String>,
        downloader: FileDownloader,
        decoder: D,
        policy: DecodeFailurePolicy,
    ) -> Self {
        let (state, _) = watch::channel(LoadState::NotLoaded);

        Self {
            inner: Arc::new(ItemInner {
                key: key.into(),
                downloader,
                decoder: Arc::new(decoder),
                policy,
                state,
                slot: Mutex::new(Slot::default()),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(0),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn state(&self) -> LoadState {
        *self.inner.state.borrow()
    }

    /// Receiver that sees every state change
    pub fn state_watch(&self) -> watch::Receiver<LoadState> {
        self.inner.state.subscribe()
    }

    /// Current location of the backing file, following relocations
    pub fn local_path(&self) -> Option<PathBuf> {
        self.inner.slot.lock().file.as_ref().map(FileWatch::path)
    }

    pub fn subscribe(&self, observer: Arc<dyn ItemObserver>) -> ObserverId {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.lock().push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Start loading unless already loaded. Returns immediately.
    pub fn request_load(&self) {
        ItemInner::start_load(&self.inner, false, None);
    }

    /// Load the resource and wait for its local path
    pub async fn load(&self) -> Result<PathBuf, ItemError> {
        let (tx, rx) = oneshot::channel();
        ItemInner::start_load(&self.inner, false, Some(tx));
        rx.await.map_err(|_| ItemError::Dropped)?
    }

    /// Download again, bypassing the cache
    pub async fn reload(&self) -> Result<PathBuf, ItemError> {
        let (tx, rx) = oneshot::channel();
        ItemInner::start_load(&self.inner, true, Some(tx));
        rx.await.map_err(|_| ItemError::Dropped)?
    }

    /// Abort an in-flight load. Pending `load` calls fail with `Cancelled`.
    pub fn cancel(&self) {
        let (transfer, waiters) = {
            let mut slot = self.inner.slot.lock();
            if self.state() != LoadState::Loading {
                return;
            }
            slot.generation += 1;
            (slot.transfer.take(), std::mem::take(&mut slot.waiters))
        };

        if let Some(transfer) = transfer {
            transfer.cancel();
        }
        self.inner.set_state(LoadState::NotLoaded);
        for waiter in waiters {
            let _ = waiter.send(Err(DownloadError::Cancelled.into()));
        }
    }

    /// Load if needed, then decode the backing file.
    ///
    /// A decode failure fails this call only. Under
    /// [`DecodeFailurePolicy::Evict`] the entry is also evicted and the item
    /// returns to `NotLoaded`.
    pub async fn request_content(&self, hint: SizeHint) -> Result<D::Output, ItemError> {
        let mut path = self.load().await?;

        if !path.is_file() {
            warn!(key = %self.inner.key, path = %path.display(), "Backing file vanished, loading again");
            self.inner.reset();
            path = self.load().await?;
        }

        let decoder = self.inner.decoder.clone();
        let decode_path = path.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&decode_path, hint))
            .await
            .map_err(|e| DecodeError::new(&path, e.to_string()))?;

        match decoded {
            Ok(content) => Ok(content),
            Err(e) => {
                warn!(key = %self.inner.key, error = %e, "Decode failed");
                if self.inner.policy == DecodeFailurePolicy::Evict {
                    self.evict_backing_entry().await;
                }
                Err(e.into())
            }
        }
    }

    async fn evict_backing_entry(&self) {
        self.inner.reset();
        let (Some(cache), Ok(url)) = (self.inner.downloader.cache(), resource_key(&self.inner.key))
        else {
            return;
        };
        if cache.evict(url.as_str()).await.is_some() {
            debug!(key = %self.inner.key, "Evicted undecodable entry");
        }
    }
}

impl<D: Decoder> ItemInner<D> {
    fn start_load(this: &Arc<Self>, invalidate: bool, waiter: Option<Waiter>) {
        let generation = {
            let mut slot = this.slot.lock();
            if !invalidate && *this.state.borrow() == LoadState::Loaded {
                if let Some(path) = slot.file.as_ref().map(FileWatch::path) {
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(Ok(path));
                    }
                    return;
                }
            }

            waiter.into_iter().for_each(|w| slot.waiters.push(w));
            if let Some(previous) = slot.transfer.take() {
                debug!(key = %this.key, "Superseding in-flight transfer");
                previous.cancel();
            }
            slot.generation += 1;
            slot.file = None;
            slot.generation
        };

        this.set_state(LoadState::Loading);

        let progress_item = Arc::downgrade(this);
        let complete_item = Arc::downgrade(this);
        let handle = this.downloader.fetch(
            &this.key,
            invalidate,
            Some(Arc::new(move |fraction: f32| {
                if let Some(item) = progress_item.upgrade() {
                    item.progress(generation, fraction);
                }
            })),
            Box::new(move |result: Result<FileWatch, DownloadError>| {
                if let Some(item) = complete_item.upgrade() {
                    item.finish(generation, result);
                }
            }),
        );

        if handle.is_noop() {
            return;
        }
        let mut slot = this.slot.lock();
        if slot.generation == generation {
            slot.transfer = Some(handle);
        } else {
            // superseded before the handle could be recorded
            drop(slot);
            handle.cancel();
        }
    }

    fn progress(&self, generation: u64, fraction: f32) {
        if self.slot.lock().generation != generation {
            return;
        }
        for observer in self.observers() {
            observer.on_progress(&self.key, fraction);
        }
    }

    fn finish(&self, generation: u64, result: Result<FileWatch, DownloadError>) {
        let (waiters, result) = {
            let mut slot = self.slot.lock();
            if slot.generation != generation {
                debug!(key = %self.key, "Ignoring completion of superseded load");
                return;
            }
            slot.transfer = None;
            let result = result.map(|file| {
                let path = file.path();
                slot.file = Some(file);
                path
            });
            (std::mem::take(&mut slot.waiters), result)
        };

        match result {
            Ok(path) => {
                debug!(key = %self.key, path = %path.display(), "Resource loaded");
                self.set_state(LoadState::Loaded);
                for waiter in waiters {
                    let _ = waiter.send(Ok(path.clone()));
                }
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Resource load failed");
                self.set_state(LoadState::NotLoaded);
                let mut waiters = waiters.into_iter();
                // DownloadError is not Clone; the first waiter gets the original
                let message = e.to_string();
                if let Some(first) = waiters.next() {
                    let _ = first.send(Err(e.into()));
                }
                for waiter in waiters {
                    let _ = waiter.send(Err(DownloadError::TransferFailed(message.clone()).into()));
                }
            }
        }
    }

    /// Forget the backing file and return to `NotLoaded`
    fn reset(&self) {
        {
            let mut slot = self.slot.lock();
            if slot.transfer.is_some() {
                return;
            }
            slot.file = None;
        }
        self.set_state(LoadState::NotLoaded);
    }

    fn set_state(&self, state: LoadState) {
        let previous = self.state.send_replace(state);
        if previous == state {
            return;
        }
        for observer in self.observers() {
            observer.on_state_changed(&self.key, state);
        }
    }

    fn observers(&self) -> Vec<Arc<dyn ItemObserver>> {
        self.observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect()
    }
}

impl<D> Drop for ItemInner<D> {
    fn drop(&mut self) {
        if let Some(transfer) = self.slot.get_mut().transfer.take() {
            transfer.cancel();
        }
    }
}

impl<D: Decoder> std::fmt::Debug for ResourceItem<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceItem")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .field("local_path", &self.local_path())
            .finish()
    }
}

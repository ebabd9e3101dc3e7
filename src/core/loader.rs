//! Transfer multiplexer: routes transport events to per-transfer handlers.
//!
//! The [`DataLoader`] owns the handler table that maps every live [`Transfer`] to exactly one
//! handler holding its progress callback, completion callback, and byte buffer. Transports report
//! bytes and completion through a [`TransferEvents`] value bound to one transfer, possibly from
//! several threads at once.
//!
//! # Serialization
//!
//! - The handler table sits behind a single `parking_lot::Mutex`; registration, lookup, and
//!   removal never overlap.
//! - Each handler has its own mutex. A data notification holds it while appending and reporting
//!   progress, and a completion notification must acquire it before delivering, so progress for
//!   a transfer is always reported before its completion.
//! - Completion removes the handler from the table before delivering, so a duplicate or late
//!   completion finds nothing and the completion callback runs at most once.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::error::TransportError;
use super::request::ImageRequest;
use crate::util::serde::TransferId;

/// Metadata the transport reports alongside the response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    /// Status code, if the transport has one.
    pub status: Option<u16>,
    /// Content type reported by the server.
    pub content_type: Option<String>,
    /// Expected body length, if known.
    pub expected_length: Option<u64>,
}

/// Progress callback: `(bytes_received, bytes_expected)`; `None` means the total is unknown.
pub type ProgressCallback = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Completion callback: `(accumulated_bytes, metadata, error)`.
pub type CompletionCallback =
    Box<dyn FnOnce(Vec<u8>, ResponseMetadata, Option<TransportError>) + Send>;

/// Control surface of one transport-level fetch.
pub trait TransportHandle: Send + Sync {
    /// Start the fetch. Calling `start` after `cancel`, or more than once, must be a no-op.
    fn start(&self);

    /// Cancel the fetch. Unless it already finished, the fetch reports completion with
    /// [`TransportError::Cancelled`], whether or not it was started.
    fn cancel(&self);
}

/// Network collaborator that performs the physical fetches.
pub trait DataTransport: Send + Sync + 'static {
    /// Prepare (but do not start) a fetch for `request` that reports through `events`.
    fn open(&self, request: &ImageRequest, events: TransferEvents) -> Arc<dyn TransportHandle>;

    /// Cancel all outstanding fetches.
    fn invalidate(&self);

    /// Clear any transport-level response cache.
    fn remove_all_cached_responses(&self);
}

/// Opaque handle to one physical transfer. Equality and hashing use the transfer id.
#[derive(Clone)]
pub struct Transfer {
    id: TransferId,
    handle: Arc<dyn TransportHandle>,
}

impl Transfer {
    /// Wrap a transport handle under the given id.
    pub fn new(id: TransferId, handle: Arc<dyn TransportHandle>) -> Self {
        Self { id, handle }
    }

    /// Transfer identifier.
    pub const fn id(&self) -> TransferId {
        self.id
    }

    pub(crate) fn start(&self) {
        self.handle.start();
    }

    pub(crate) fn cancel(&self) {
        self.handle.cancel();
    }
}

impl PartialEq for Transfer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transfer {}

impl Hash for Transfer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer").field("id", &self.id).finish()
    }
}

struct Handler {
    data: Vec<u8>,
    progress: ProgressCallback,
    completion: Option<CompletionCallback>,
}

struct HandlerEntry {
    transfer: Transfer,
    handler: Arc<Mutex<Handler>>,
}

#[derive(Default)]
struct HandlerTable {
    handlers: HashMap<TransferId, HandlerEntry>,
    invalidated: bool,
}

/// Event sink handed to the transport for one transfer.
///
/// Holds only a weak reference to the handler table, so a transport that outlives its loader
/// reports into nothing.
#[derive(Clone)]
pub struct TransferEvents {
    id: TransferId,
    table: Weak<Mutex<HandlerTable>>,
}

impl TransferEvents {
    /// Transfer these events belong to.
    pub const fn transfer_id(&self) -> TransferId {
        self.id
    }

    /// Report a received chunk. Late notifications for finished transfers are ignored.
    pub fn did_receive(&self, chunk: &[u8], expected: Option<u64>) {
        let Some(handler) = self.lookup() else {
            trace!(transfer = self.id, "ignoring data for finished transfer");
            return;
        };
        let mut handler = handler.lock();
        if handler.completion.is_none() {
            return;
        }
        handler.data.extend_from_slice(chunk);
        let received = handler.data.len() as u64;
        (handler.progress)(received, expected);
    }

    /// Report that the transfer finished, successfully when `error` is `None`.
    pub fn did_complete(&self, metadata: ResponseMetadata, error: Option<TransportError>) {
        let removed = match self.table.upgrade() {
            Some(table) => {
                let entry = table.lock().handlers.remove(&self.id);
                entry
            }
            None => None,
        };
        let Some(HandlerEntry { handler, .. }) = removed else {
            trace!(transfer = self.id, "ignoring completion for finished transfer");
            return;
        };

        let (completion, data) = {
            let mut handler = handler.lock();
            (handler.completion.take(), std::mem::take(&mut handler.data))
        };
        if let Some(completion) = completion {
            debug!(
                transfer = self.id,
                bytes = data.len(),
                failed = error.is_some(),
                "transfer completed"
            );
            completion(data, metadata, error);
        }
    }

    fn lookup(&self) -> Option<Arc<Mutex<Handler>>> {
        let table = self.table.upgrade()?;
        let handler = table
            .lock()
            .handlers
            .get(&self.id)
            .map(|entry| Arc::clone(&entry.handler));
        handler
    }
}

/// Creates transfers and owns the transfer-to-handler table.
pub struct DataLoader {
    transport: Arc<dyn DataTransport>,
    table: Arc<Mutex<HandlerTable>>,
    next_id: AtomicU64,
}

impl DataLoader {
    /// Create a loader over the given transport.
    pub fn new(transport: Arc<dyn DataTransport>) -> Self {
        Self {
            transport,
            table: Arc::new(Mutex::new(HandlerTable::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a transfer for `request` and register its handler.
    ///
    /// The returned transfer is not started; admission is the caller's job.
    pub fn create<P, C>(
        &self,
        request: &ImageRequest,
        progress: P,
        completion: C,
    ) -> Result<Transfer, TransportError>
    where
        P: Fn(u64, Option<u64>) + Send + Sync + 'static,
        C: FnOnce(Vec<u8>, ResponseMetadata, Option<TransportError>) + Send + 'static,
    {
        if self.table.lock().invalidated {
            return Err(TransportError::Invalidated);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let events = TransferEvents {
            id,
            table: Arc::downgrade(&self.table),
        };
        let transfer = Transfer::new(id, self.transport.open(request, events));

        let mut table = self.table.lock();
        if table.invalidated {
            drop(table);
            transfer.cancel();
            return Err(TransportError::Invalidated);
        }
        table.handlers.insert(
            id,
            HandlerEntry {
                transfer: transfer.clone(),
                handler: Arc::new(Mutex::new(Handler {
                    data: Vec::new(),
                    progress: Box::new(progress),
                    completion: Some(Box::new(completion)),
                })),
            },
        );
        drop(table);

        debug!(transfer = id, url = %request.url(), "transfer created");
        Ok(transfer)
    }

    /// Drop the handler for `transfer` without invoking it.
    ///
    /// Used for transfers whose owner has gone away; any later event for the transfer is
    /// ignored. Returns true if a handler was registered.
    pub fn discard(&self, transfer: &Transfer) -> bool {
        let removed = self.table.lock().handlers.remove(&transfer.id()).is_some();
        if removed {
            trace!(transfer = transfer.id(), "handler discarded");
        }
        removed
    }

    /// Cancel every outstanding transfer and refuse new ones.
    pub fn invalidate(&self) {
        let transfers: Vec<Transfer> = {
            let mut table = self.table.lock();
            table.invalidated = true;
            table
                .handlers
                .values()
                .map(|entry| entry.transfer.clone())
                .collect()
        };
        info!(outstanding = transfers.len(), "invalidating data loader");
        for transfer in &transfers {
            transfer.cancel();
        }
        self.transport.invalidate();
    }

    /// Returns true once [`DataLoader::invalidate`] has been called.
    pub fn is_invalidated(&self) -> bool {
        self.table.lock().invalidated
    }

    /// Clear the transport's response cache. Decoded images are unaffected.
    pub fn remove_all_cached_images(&self) {
        self.transport.remove_all_cached_responses();
    }

    /// Number of transfers with a registered handler.
    pub fn live_transfer_count(&self) -> usize {
        self.table.lock().handlers.len()
    }
}

impl Drop for DataLoader {
    fn drop(&mut self) {
        let live = self.table.lock().handlers.len();
        if live > 0 {
            warn!(live, "data loader dropped with live transfers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingTransport {
        events: Mutex<Vec<TransferEvents>>,
        cancels: Arc<AtomicUsize>,
        invalidations: AtomicUsize,
        cache_clears: AtomicUsize,
    }

    struct RecordingHandle {
        cancels: Arc<AtomicUsize>,
    }

    impl TransportHandle for RecordingHandle {
        fn start(&self) {}

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl DataTransport for RecordingTransport {
        fn open(&self, _request: &ImageRequest, events: TransferEvents) -> Arc<dyn TransportHandle> {
            self.events.lock().push(events);
            Arc::new(RecordingHandle {
                cancels: Arc::clone(&self.cancels),
            })
        }

        fn invalidate(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }

        fn remove_all_cached_responses(&self) {
            self.cache_clears.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request() -> ImageRequest {
        ImageRequest::parse("https://example.com/a.png").unwrap()
    }

    type Completed = Arc<Mutex<Vec<(Vec<u8>, Option<TransportError>)>>>;

    type Progressed = Arc<Mutex<Vec<(u64, Option<u64>)>>>;

    fn loader_with_transfer() -> (DataLoader, Arc<RecordingTransport>, Transfer, Completed, Progressed) {
        let transport = Arc::new(RecordingTransport::default());
        let loader = DataLoader::new(Arc::clone(&transport) as Arc<dyn DataTransport>);
        let completed: Completed = Arc::default();
        let progress: Progressed = Arc::default();
        let sink = Arc::clone(&completed);
        let progress_sink = Arc::clone(&progress);
        let transfer = loader
            .create(
                &request(),
                move |received, expected| progress_sink.lock().push((received, expected)),
                move |data, _meta, error| sink.lock().push((data, error)),
            )
            .unwrap();
        (loader, transport, transfer, completed, progress)
    }

    #[test]
    fn test_chunks_are_concatenated_and_late_events_ignored() {
        let (loader, transport, _transfer, completed, progress) = loader_with_transfer();
        let events = transport.events.lock()[0].clone();

        events.did_receive(b"hello ", Some(11));
        events.did_receive(b"world", Some(11));
        events.did_complete(ResponseMetadata::default(), None);
        events.did_receive(b"late", Some(11));
        events.did_complete(ResponseMetadata::default(), None);

        let completed = completed.lock();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, b"hello world".to_vec());
        assert!(completed[0].1.is_none());
        assert_eq!(*progress.lock(), vec![(6, Some(11)), (11, Some(11))]);
        assert_eq!(loader.live_transfer_count(), 0);
    }

    #[test]
    fn test_error_completion_carries_partial_data() {
        let (_loader, transport, _transfer, completed, _progress) = loader_with_transfer();
        let events = transport.events.lock()[0].clone();

        events.did_receive(b"abc", None);
        events.did_complete(ResponseMetadata::default(), Some(TransportError::TimedOut));

        let completed = completed.lock();
        assert_eq!(completed[0].0, b"abc".to_vec());
        assert_eq!(completed[0].1, Some(TransportError::TimedOut));
    }

    #[test]
    fn test_discard_silences_transfer() {
        let (loader, transport, transfer, completed, _progress) = loader_with_transfer();
        assert!(loader.discard(&transfer));
        assert!(!loader.discard(&transfer));

        transport.events.lock()[0].did_complete(ResponseMetadata::default(), None);
        assert!(completed.lock().is_empty());
    }

    #[test]
    fn test_invalidate_cancels_and_refuses_new_transfers() {
        let (loader, transport, _transfer, _completed, _progress) = loader_with_transfer();
        loader.invalidate();

        assert!(loader.is_invalidated());
        assert_eq!(transport.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(transport.invalidations.load(Ordering::SeqCst), 1);
        let err = loader.create(&request(), |_, _| {}, |_, _, _| {}).unwrap_err();
        assert_eq!(err, TransportError::Invalidated);
    }

    #[test]
    fn test_remove_all_cached_images_reaches_transport() {
        let (loader, transport, _transfer, _completed, _progress) = loader_with_transfer();
        loader.remove_all_cached_images();
        assert_eq!(transport.cache_clears.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_events_outliving_loader_are_ignored() {
        let (loader, transport, _transfer, completed, _progress) = loader_with_transfer();
        drop(loader);
        let events = transport.events.lock()[0].clone();
        events.did_receive(b"x", None);
        events.did_complete(ResponseMetadata::default(), None);
        assert!(completed.lock().is_empty());
    }
}

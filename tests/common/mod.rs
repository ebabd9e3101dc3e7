//! Shared fixtures for integration tests: a scriptable transport, spawners, and image bytes.

#![allow(dead_code)]

use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat};
use parking_lot::Mutex;
use prometheus_image_loader::config::QueueConfig;
use prometheus_image_loader::core::{
    AdmissionQueue, DataLoader, DataTransport, ImageDecoder, ImageManager, ImageRequest,
    ResponseMetadata, Spawn, Transfer, TransferEvents, TransportError, TransportHandle,
};
use prometheus_image_loader::infra::InMemoryImageCache;

// ============================================================================
// SPAWNERS
// ============================================================================

/// Runs every future to completion on the calling thread, ignoring delays.
#[derive(Clone, Default)]
pub struct InlineSpawner;

impl Spawn for InlineSpawner {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        futures::executor::block_on(fut);
    }

    fn spawn_after<F>(&self, _delay: Duration, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        futures::executor::block_on(fut);
    }
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Counters shared by a [`MockTransport`] and its handles.
#[derive(Default)]
pub struct TransportStats {
    pub opened: AtomicUsize,
    pub started: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub invalidations: AtomicUsize,
    pub cache_clears: AtomicUsize,
    /// Largest number of fetches running at the same time.
    pub peak_running: AtomicUsize,
    running: AtomicUsize,
}

impl TransportStats {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

/// One fetch opened on a [`MockTransport`]; the test decides when and how it finishes.
pub struct MockHandle {
    pub url: String,
    pub events: TransferEvents,
    started: AtomicBool,
    finished: AtomicBool,
    stats: Arc<TransportStats>,
}

impl MockHandle {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Deliver `body` in two chunks and complete successfully.
    pub fn respond(&self, body: &[u8]) {
        let expected = Some(body.len() as u64);
        let (head, tail) = body.split_at(body.len() / 2);
        self.events.did_receive(head, expected);
        self.events.did_receive(tail, expected);
        self.complete(None);
    }

    /// Complete with `error` and no body.
    pub fn fail(&self, error: TransportError) {
        self.complete(Some(error));
    }

    fn complete(&self, error: Option<TransportError>) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.is_started() {
            self.stats.running.fetch_sub(1, Ordering::SeqCst);
        }
        let metadata = ResponseMetadata {
            status: Some(if error.is_some() { 500 } else { 200 }),
            content_type: Some("image/png".into()),
            expected_length: None,
        };
        self.events.did_complete(metadata, error);
    }
}

impl TransportHandle for MockHandle {
    fn start(&self) {
        if self.is_finished() || self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stats.started.fetch_add(1, Ordering::SeqCst);
        let running = self.stats.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_running.fetch_max(running, Ordering::SeqCst);
    }

    fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        self.stats.cancelled.fetch_add(1, Ordering::SeqCst);
        self.fail(TransportError::Cancelled);
    }
}

/// Transport whose fetches are completed explicitly by the test.
#[derive(Default)]
pub struct MockTransport {
    pub stats: Arc<TransportStats>,
    handles: Mutex<Vec<Arc<MockHandle>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every handle opened so far, in creation order.
    pub fn handles(&self) -> Vec<Arc<MockHandle>> {
        self.handles.lock().clone()
    }

    /// Most recently opened handle.
    pub fn last(&self) -> Arc<MockHandle> {
        self.handles
            .lock()
            .last()
            .cloned()
            .expect("no transfer was opened")
    }

    /// Handles that are started and not finished.
    pub fn running(&self) -> Vec<Arc<MockHandle>> {
        self.handles
            .lock()
            .iter()
            .filter(|handle| handle.is_started() && !handle.is_finished())
            .cloned()
            .collect()
    }
}

impl DataTransport for MockTransport {
    fn open(&self, request: &ImageRequest, events: TransferEvents) -> Arc<dyn TransportHandle> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(MockHandle {
            url: request.url().to_string(),
            events,
            started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            stats: Arc::clone(&self.stats),
        });
        self.handles.lock().push(Arc::clone(&handle));
        handle
    }

    fn invalidate(&self) {
        self.stats.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_all_cached_responses(&self) {
        self.stats.cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handle with no behaviour, for driving the admission queue directly.
#[derive(Default)]
pub struct CountingHandle {
    pub starts: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl TransportHandle for CountingHandle {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn counting_transfer(id: u64) -> (Transfer, Arc<CountingHandle>) {
    let handle = Arc::new(CountingHandle::default());
    (Transfer::new(id, handle.clone()), handle)
}

// ============================================================================
// FIXTURES
// ============================================================================

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::new_rgba8(width, height)
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

pub fn request(path: &str) -> ImageRequest {
    ImageRequest::parse(&format!("https://images.example.com/{path}")).expect("valid url")
}

pub fn sync_queue_config(cap: usize) -> QueueConfig {
    QueueConfig {
        max_concurrent_transfers: cap,
        congestion_control_enabled: false,
    }
}

/// Manager over a [`MockTransport`] with synchronous scheduling and processing.
pub fn inline_manager(cap: usize) -> (ImageManager<InlineSpawner>, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let manager = ImageManager::new(
        DataLoader::new(transport.clone()),
        AdmissionQueue::new(&sync_queue_config(cap), InlineSpawner),
        Arc::new(ImageDecoder::new()),
        Some(Arc::new(InMemoryImageCache::new(32))),
        InlineSpawner,
    );
    (manager, transport)
}

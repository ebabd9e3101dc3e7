//! Image manager: wires tasks to the data loader, admission queue, decoder, and cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::admission::AdmissionQueue;
use super::cache::ImageCaching;
use super::decoder::ImageDecoding;
use super::error::{LoadError, TransportError};
use super::loader::{DataLoader, ResponseMetadata, Transfer};
use super::processor::ImageProcessing;
use super::request::{ImageRequest, ImageRequestKey, MemoryCachePolicy};
use super::spawn::Spawn;
use super::task::{ImageResponse, ImageResponseInfo, ImageTask, TaskDriver, TaskInner};
use crate::util::serde::{Priority, TaskId};

/// Registry record for a resumed task.
///
/// `transfer` is `None` once the data arrived and the image is being processed.
struct TaskEntry {
    task: Weak<TaskInner>,
    transfer: Option<Transfer>,
}

struct ManagerInner<S> {
    loader: DataLoader,
    queue: AdmissionQueue<S>,
    decoder: Arc<dyn ImageDecoding>,
    cache: Option<Arc<dyn ImageCaching>>,
    spawner: S,
    registry: Mutex<HashMap<TaskId, TaskEntry>>,
    preheating: Mutex<HashMap<ImageRequestKey, ImageTask>>,
    next_task_id: AtomicU64,
    this: Weak<Self>,
}

/// Entry point for loading images.
///
/// The manager only keeps weak references to the tasks it hands out. Keep the returned
/// [`ImageTask`] alive for as long as its result is wanted; dropping every handle to an
/// unfinished task abandons it.
pub struct ImageManager<S> {
    inner: Arc<ManagerInner<S>>,
}

impl<S> Clone for ImageManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> ImageManager<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    /// Wire a manager from its collaborators. Prefer
    /// [`ImageManagerBuilder`](crate::builders::ImageManagerBuilder).
    pub fn new(
        loader: DataLoader,
        queue: AdmissionQueue<S>,
        decoder: Arc<dyn ImageDecoding>,
        cache: Option<Arc<dyn ImageCaching>>,
        spawner: S,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| ManagerInner {
            loader,
            queue,
            decoder,
            cache,
            spawner,
            registry: Mutex::new(HashMap::new()),
            preheating: Mutex::new(HashMap::new()),
            next_task_id: AtomicU64::new(1),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Create a suspended task for `request`.
    #[must_use = "dropping the task abandons it"]
    pub fn task_with(&self, request: ImageRequest) -> ImageTask {
        self.inner.make_task(request)
    }

    /// Create a task for `request`, register `completion`, and resume it.
    #[must_use = "dropping the task abandons it"]
    pub fn task_with_completion<F>(&self, request: ImageRequest, completion: F) -> ImageTask
    where
        F: FnOnce(ImageResponse) + Send + 'static,
    {
        let task = self.inner.make_task(request);
        task.completion(completion);
        task.resume();
        task
    }

    /// Response served straight from the memory cache, if the request allows it.
    pub fn cached_response(&self, request: &ImageRequest) -> Option<ImageResponse> {
        self.inner.cached_response(request)
    }

    /// Start loading `requests` at low priority so later tasks hit the memory cache.
    ///
    /// Requests that are already being preheated (by cache equivalence) are skipped.
    pub fn start_preheating<I>(&self, requests: I)
    where
        I: IntoIterator<Item = ImageRequest>,
    {
        for request in requests {
            let request = request.with_priority(Priority::Low);
            let key = request.cache_key();
            let task = {
                let mut preheating = self.inner.preheating.lock();
                if preheating.contains_key(&key) {
                    continue;
                }
                let task = self.inner.make_task(request);
                preheating.insert(key.clone(), task.clone());
                task
            };

            let this = self.inner.this.clone();
            let id = task.id();
            task.completion(move |_| {
                if let Some(inner) = this.upgrade() {
                    inner.remove_preheating(&key, id);
                }
            });
            trace!(task = id, url = %task.request().url(), "preheating");
            task.resume();
        }
    }

    /// Stop preheating `requests`, cancelling their tasks.
    pub fn stop_preheating<'a, I>(&self, requests: I)
    where
        I: IntoIterator<Item = &'a ImageRequest>,
    {
        let stopped: Vec<ImageTask> = {
            let mut preheating = self.inner.preheating.lock();
            requests
                .into_iter()
                .filter_map(|request| preheating.remove(&request.cache_key()))
                .collect()
        };
        for task in &stopped {
            task.cancel();
        }
    }

    /// Stop every preheating task.
    pub fn stop_preheating_all(&self) {
        self.inner.stop_preheating_all();
    }

    /// Number of requests currently being preheated.
    pub fn preheating_count(&self) -> usize {
        self.inner.preheating.lock().len()
    }

    /// Cancel every outstanding task and invalidate the data loader.
    ///
    /// Tasks resumed afterwards fail with [`TransportError::Invalidated`].
    pub fn invalidate_and_cancel(&self) {
        self.inner.stop_preheating_all();
        let tasks: Vec<Weak<TaskInner>> = self
            .inner
            .registry
            .lock()
            .values()
            .map(|entry| entry.task.clone())
            .collect();
        info!(tasks = tasks.len(), "invalidating image manager");
        for task in tasks.iter().filter_map(ImageTask::upgrade) {
            task.cancel();
        }
        self.inner.loader.invalidate();
    }

    /// Clear the memory cache and the transport's response cache.
    pub fn remove_all_cached_images(&self) {
        if let Some(cache) = &self.inner.cache {
            cache.clear();
        }
        self.inner.loader.remove_all_cached_images();
    }

    /// Admission queue, for tuning concurrency at runtime.
    pub fn queue(&self) -> &AdmissionQueue<S> {
        &self.inner.queue
    }

    /// Data loader owning the transfer table.
    pub fn loader(&self) -> &DataLoader {
        &self.inner.loader
    }

    /// Memory cache, if enabled.
    pub fn cache(&self) -> Option<&Arc<dyn ImageCaching>> {
        self.inner.cache.as_ref()
    }

    /// Number of resumed tasks that have not finished yet.
    pub fn active_task_count(&self) -> usize {
        self.inner.registry.lock().len()
    }
}

impl<S> ManagerInner<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    fn make_task(&self, request: ImageRequest) -> ImageTask {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let driver: Weak<dyn TaskDriver> = self.this.clone();
        ImageTask::new(id, request, driver)
    }

    fn cached_response(&self, request: &ImageRequest) -> Option<ImageResponse> {
        if request.memory_cache_policy() != MemoryCachePolicy::ReturnCachedImageElseLoad {
            return None;
        }
        let image = self.cache.as_ref()?.get(&request.cache_key())?;
        Some(ImageResponse::Success {
            image,
            info: ImageResponseInfo {
                is_fast_response: true,
                metadata: None,
            },
        })
    }

    fn remove_preheating(&self, key: &ImageRequestKey, id: TaskId) {
        let removed = {
            let mut preheating = self.preheating.lock();
            if preheating.get(key).is_some_and(|task| task.id() == id) {
                preheating.remove(key)
            } else {
                None
            }
        };
        drop(removed);
    }

    fn stop_preheating_all(&self) {
        let stopped: Vec<ImageTask> = self.preheating.lock().drain().map(|(_, task)| task).collect();
        if !stopped.is_empty() {
            debug!(count = stopped.len(), "stopping all preheating");
        }
        for task in &stopped {
            task.cancel();
        }
    }

    /// Withdraw and silence a transfer whose task went away.
    fn release_transfer(&self, transfer: &Transfer) {
        self.loader.discard(transfer);
        self.queue.cancel(transfer);
    }

    fn start_transfer(&self, task: &ImageTask) {
        let id = task.id();
        let request = task.request();

        let progress = {
            let this = self.this.clone();
            move |completed, total| {
                if let Some(inner) = this.upgrade() {
                    inner.on_progress(id, completed, total);
                }
            }
        };
        let completion = {
            let this = self.this.clone();
            move |data, metadata, error| {
                if let Some(inner) = this.upgrade() {
                    inner.on_transfer_complete(id, data, metadata, error);
                }
            }
        };

        let transfer = match self.loader.create(request, progress, completion) {
            Ok(transfer) => transfer,
            Err(err) => {
                debug!(task = id, error = %err, "failed to create transfer");
                task.finish(ImageResponse::Failure(err.into()));
                return;
            }
        };

        self.registry.lock().insert(
            id,
            TaskEntry {
                task: task.downgrade(),
                transfer: Some(transfer.clone()),
            },
        );
        self.enqueue(task, &transfer);
    }

    fn enqueue(&self, task: &ImageTask, transfer: &Transfer) {
        self.queue.resume(transfer);
        // A cancel that raced this resume may have missed the registry entry or the queue.
        if task.state().is_terminal() {
            self.registry.lock().remove(&task.id());
            self.release_transfer(transfer);
        }
    }

    fn on_progress(&self, id: TaskId, completed: u64, total: Option<u64>) {
        let task = self.registry.lock().get(&id).map(|entry| entry.task.clone());
        if let Some(task) = task.as_ref().and_then(ImageTask::upgrade) {
            task.set_progress(completed, total);
        }
    }

    fn on_transfer_complete(
        &self,
        id: TaskId,
        data: Vec<u8>,
        metadata: ResponseMetadata,
        error: Option<TransportError>,
    ) {
        let (task, transfer) = {
            let mut registry = self.registry.lock();
            let Some(entry) = registry.get_mut(&id) else {
                return;
            };
            let transfer = entry.transfer.take();
            let task = entry.task.clone();
            if error.is_some() {
                registry.remove(&id);
            }
            (task, transfer)
        };
        if let Some(transfer) = &transfer {
            self.queue.finish(transfer);
        }
        let Some(task) = ImageTask::upgrade(&task) else {
            self.registry.lock().remove(&id);
            return;
        };

        if let Some(err) = error {
            debug!(task = id, error = %err, "transfer failed");
            task.finish(ImageResponse::Failure(err.into()));
            return;
        }

        trace!(task = id, bytes = data.len(), "transfer complete, processing");
        let decoder = Arc::clone(&self.decoder);
        let cache = self.cache.clone();
        let this = self.this.clone();
        self.spawner.spawn(async move {
            let response = decode_and_process(decoder.as_ref(), cache.as_deref(), &task, &data, metadata);
            if let Some(inner) = this.upgrade() {
                inner.registry.lock().remove(&id);
            }
            task.finish(response);
        });
    }
}

fn decode_and_process(
    decoder: &dyn ImageDecoding,
    cache: Option<&dyn ImageCaching>,
    task: &ImageTask,
    data: &[u8],
    metadata: ResponseMetadata,
) -> ImageResponse {
    if task.state().is_terminal() {
        return ImageResponse::Failure(LoadError::Cancelled);
    }
    let Some(image) = decoder.decode(data, &metadata) else {
        return ImageResponse::Failure(LoadError::DecodingFailed);
    };
    let request = task.request();
    let Some(image) = request.effective_processor().process(image) else {
        return ImageResponse::Failure(LoadError::ProcessingFailed);
    };
    if let Some(cache) = cache {
        cache.insert(request.cache_key(), image.clone());
    }
    ImageResponse::Success {
        image,
        info: ImageResponseInfo {
            is_fast_response: false,
            metadata: Some(metadata),
        },
    }
}

impl<S> TaskDriver for ManagerInner<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    fn resume_task(&self, task: &ImageTask) {
        let existing = self
            .registry
            .lock()
            .get(&task.id())
            .map(|entry| entry.transfer.clone());
        match existing {
            // Suspended while queued: put the same transfer back.
            Some(Some(transfer)) => self.enqueue(task, &transfer),
            // Data already arrived; processing finishes the task.
            Some(None) => {}
            None => {
                if let Some(response) = self.cached_response(task.request()) {
                    trace!(task = task.id(), "memory cache hit");
                    task.finish(response);
                } else {
                    self.start_transfer(task);
                }
            }
        }
    }

    fn suspend_task(&self, task: &ImageTask) {
        let transfer = self
            .registry
            .lock()
            .get(&task.id())
            .and_then(|entry| entry.transfer.clone());
        if let Some(transfer) = transfer {
            if self.queue.suspend(&transfer) {
                trace!(task = task.id(), transfer = transfer.id(), "withdrew pending transfer");
            }
        }
    }

    fn cancel_task(&self, task: &ImageTask) {
        self.abandon_task(task.id());
    }

    fn abandon_task(&self, id: TaskId) {
        let entry = self.registry.lock().remove(&id);
        if let Some(transfer) = entry.and_then(|entry| entry.transfer) {
            debug!(task = id, transfer = transfer.id(), "releasing transfer");
            self.release_transfer(&transfer);
        }
    }
}

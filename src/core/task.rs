//! Image tasks: cancellable, resumable subscriptions to a request's result.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::error::LoadError;
use super::image::Image;
use super::loader::ResponseMetadata;
use super::request::ImageRequest;
use crate::util::serde::TaskId;

/// Lifecycle state of an image task.
///
/// `Suspended → Running → Completed`, with `Cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created or suspended; no new work is started.
    Suspended,
    /// Loading.
    Running,
    /// Cancelled by the caller or the loader; terminal.
    Cancelled,
    /// Finished with success or failure; terminal.
    Completed,
}

impl TaskState {
    /// Returns true for `Cancelled` and `Completed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }
}

/// Download progress of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Bytes received so far.
    pub completed: u64,
    /// Expected total; `None` while indeterminate.
    pub total: Option<u64>,
}

impl Progress {
    /// Returns true while the expected total is unknown.
    pub const fn is_indeterminate(&self) -> bool {
        self.total.is_none()
    }

    /// Completed fraction in `0.0..=1.0`, if the total is known.
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Details accompanying a successful response.
#[derive(Debug, Clone, Default)]
pub struct ImageResponseInfo {
    /// True when the image was served from the memory cache without loading.
    pub is_fast_response: bool,
    /// Transport metadata, absent for cached responses.
    pub metadata: Option<ResponseMetadata>,
}

/// Terminal result of an image task.
#[derive(Debug, Clone)]
pub enum ImageResponse {
    /// The image was loaded and processed.
    Success {
        /// Processed image.
        image: Image,
        /// Response details.
        info: ImageResponseInfo,
    },
    /// Loading failed or was cancelled.
    Failure(LoadError),
}

impl ImageResponse {
    /// Processed image, if successful.
    pub const fn image(&self) -> Option<&Image> {
        match self {
            Self::Success { image, .. } => Some(image),
            Self::Failure(_) => None,
        }
    }

    /// Failure, if any.
    pub const fn error(&self) -> Option<&LoadError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(err) => Some(err),
        }
    }

    /// Returns true for a successful response.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns true if the task was cancelled.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Failure(LoadError::Cancelled))
    }
}

type CompletionHandler = Box<dyn FnOnce(ImageResponse) + Send>;

/// Loader-side operations a task forwards its transitions to.
pub(crate) trait TaskDriver: Send + Sync {
    /// Called after the task moved to `Running`.
    fn resume_task(&self, task: &ImageTask);
    /// Called after the task moved back to `Suspended`.
    fn suspend_task(&self, task: &ImageTask);
    /// Called after the task moved to `Cancelled`, before handlers run.
    fn cancel_task(&self, task: &ImageTask);
    /// Called when the last handle to an unfinished task is dropped.
    fn abandon_task(&self, id: TaskId);
}

struct TaskCore {
    state: TaskState,
    response: Option<ImageResponse>,
    completions: Vec<CompletionHandler>,
    progress: Progress,
}

pub(crate) struct TaskInner {
    id: TaskId,
    request: ImageRequest,
    core: Mutex<TaskCore>,
    driver: Weak<dyn TaskDriver>,
}

impl Drop for TaskInner {
    fn drop(&mut self) {
        if self.core.get_mut().state.is_terminal() {
            return;
        }
        if let Some(driver) = self.driver.upgrade() {
            trace!(task = self.id, "unfinished task dropped");
            driver.abandon_task(self.id);
        }
    }
}

/// A subscription to the eventual result of an [`ImageRequest`].
///
/// Tasks start `Suspended`; call [`resume`](Self::resume) to start loading. Every registered
/// completion handler receives exactly one terminal response, even when a cancel races a
/// natural completion. Clones share state; equality and hashing use the task id. Dropping the
/// last clone of an unfinished task abandons it and releases its transfer without running the
/// handlers.
#[derive(Clone)]
pub struct ImageTask {
    inner: Arc<TaskInner>,
}

impl ImageTask {
    pub(crate) fn new(id: TaskId, request: ImageRequest, driver: Weak<dyn TaskDriver>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                request,
                core: Mutex::new(TaskCore {
                    state: TaskState::Suspended,
                    response: None,
                    completions: Vec::new(),
                    progress: Progress::default(),
                }),
                driver,
            }),
        }
    }

    /// Unique task identifier.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Request this task loads.
    pub fn request(&self) -> &ImageRequest {
        &self.inner.request
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.inner.core.lock().state
    }

    /// Terminal response, once the task finished.
    pub fn response(&self) -> Option<ImageResponse> {
        self.inner.core.lock().response.clone()
    }

    /// Current download progress.
    pub fn progress(&self) -> Progress {
        self.inner.core.lock().progress
    }

    /// Register a completion handler.
    ///
    /// If the task already finished, the handler runs immediately on the calling thread with the
    /// stored response; no work is repeated.
    pub fn completion<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(ImageResponse) + Send + 'static,
    {
        let mut core = self.inner.core.lock();
        match core.response.clone() {
            Some(response) => {
                drop(core);
                handler(response);
            }
            None => core.completions.push(Box::new(handler)),
        }
        self
    }

    /// Start or continue loading. No-op unless the task is `Suspended`.
    pub fn resume(&self) -> &Self {
        {
            let mut core = self.inner.core.lock();
            if core.state != TaskState::Suspended {
                return self;
            }
            core.state = TaskState::Running;
        }
        debug!(task = self.id(), url = %self.request().url(), "task resumed");
        match self.inner.driver.upgrade() {
            Some(driver) => driver.resume_task(self),
            None => {
                self.finish(ImageResponse::Failure(LoadError::Cancelled));
            }
        }
        self
    }

    /// Advise the task to stop starting new work.
    ///
    /// A transfer that is already running may continue; a queued one is withdrawn and restarted
    /// on the next [`resume`](Self::resume).
    pub fn suspend(&self) -> &Self {
        {
            let mut core = self.inner.core.lock();
            if core.state != TaskState::Running {
                return self;
            }
            core.state = TaskState::Suspended;
        }
        if let Some(driver) = self.inner.driver.upgrade() {
            driver.suspend_task(self);
        }
        self
    }

    /// Cancel the task. Registered handlers receive [`LoadError::Cancelled`].
    ///
    /// No-op if the task already finished.
    pub fn cancel(&self) -> &Self {
        let response = ImageResponse::Failure(LoadError::Cancelled);
        let Some(handlers) = self.transition(&response) else {
            return self;
        };
        debug!(task = self.id(), "task cancelled");
        if let Some(driver) = self.inner.driver.upgrade() {
            driver.cancel_task(self);
        }
        Self::deliver(handlers, &response);
        self
    }

    /// Deliver the terminal response. Returns false if the task had already finished.
    pub(crate) fn finish(&self, response: ImageResponse) -> bool {
        match self.transition(&response) {
            Some(handlers) => {
                Self::deliver(handlers, &response);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_progress(&self, completed: u64, total: Option<u64>) {
        let mut core = self.inner.core.lock();
        if !core.state.is_terminal() {
            core.progress = Progress { completed, total };
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<TaskInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<TaskInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Moves to the terminal state matching `response`, returning the handlers to run.
    fn transition(&self, response: &ImageResponse) -> Option<Vec<CompletionHandler>> {
        let mut core = self.inner.core.lock();
        if core.state.is_terminal() {
            return None;
        }
        core.state = if response.is_cancelled() {
            TaskState::Cancelled
        } else {
            TaskState::Completed
        };
        if let ImageResponse::Success { .. } = response {
            if let Some(total) = core.progress.total {
                core.progress.completed = total;
            }
        }
        core.response = Some(response.clone());
        Some(std::mem::take(&mut core.completions))
    }

    fn deliver(handlers: Vec<CompletionHandler>, response: &ImageResponse) {
        for handler in handlers {
            handler(response.clone());
        }
    }
}

impl PartialEq for ImageTask {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ImageTask {}

impl Hash for ImageTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ImageTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageTask")
            .field("id", &self.inner.id)
            .field("url", &self.inner.request.url().as_str())
            .field("state", &self.state())
            .finish()
    }
}

//! Per-target loading controller for views that display one image at a time.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::core::{ImageManager, ImageRequest, ImageResponse, ImageTask, Spawn};

type ResponseHandler = Arc<dyn Fn(ImageResponse) + Send + Sync>;

/// Loads images for a single display target, such as a reusable cell.
///
/// Setting a new request cancels the previous one, and only the current task's response reaches
/// the handler. Memory cache hits are delivered synchronously. Dropping the controller cancels
/// whatever it is loading.
pub struct ImageLoadingController<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    manager: ImageManager<S>,
    handler: ResponseHandler,
    current: Arc<Mutex<Option<ImageTask>>>,
}

impl<S> ImageLoadingController<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    /// Create a controller delivering responses to `handler`.
    pub fn new<F>(manager: ImageManager<S>, handler: F) -> Self
    where
        F: Fn(ImageResponse) + Send + Sync + 'static,
    {
        Self {
            manager,
            handler: Arc::new(handler),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Load `request`, replacing whatever was loading before.
    pub fn set_image_with(&self, request: ImageRequest) {
        self.cancel_loading();

        if let Some(response) = self.manager.cached_response(&request) {
            (self.handler)(response);
            return;
        }

        let task = self.manager.task_with(request);
        let id = task.id();
        let handler = Arc::clone(&self.handler);
        let current = Arc::downgrade(&self.current);
        task.completion(move |response| {
            let Some(current) = current.upgrade() else {
                return;
            };
            let finished = {
                let mut slot = current.lock();
                if slot.as_ref().is_some_and(|task| task.id() == id) {
                    slot.take()
                } else {
                    None
                }
            };
            if finished.is_some() {
                handler(response);
            } else {
                trace!(task = id, "dropping response for replaced task");
            }
        });
        *self.current.lock() = Some(task.clone());
        task.resume();
    }

    /// Cancel the current task, if any. Its response is not delivered.
    pub fn cancel_loading(&self) {
        let previous = self.current.lock().take();
        if let Some(task) = previous {
            task.cancel();
        }
    }

    /// Task currently loading, if any.
    pub fn current_task(&self) -> Option<ImageTask> {
        self.current.lock().clone()
    }
}

impl<S> Drop for ImageLoadingController<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cancel_loading();
    }
}

//! Runtime-agnostic spawning used for delayed admission passes and image processing.

use std::future::Future;
use std::time::Duration;

/// Abstraction for spawning work on a runtime.
pub trait Spawn {
    /// Spawn a future to run to completion in the background.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawn a future that starts after `delay` has elapsed.
    ///
    /// Implementations must not block the calling thread while waiting.
    fn spawn_after<F>(&self, delay: Duration, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

//! Configuration models for the queue, transport, and caches.

pub mod manager;

pub use manager::{CacheConfig, ImageManagerConfig, QueueConfig, TransportConfig};

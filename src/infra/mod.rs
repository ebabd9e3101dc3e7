//! Infrastructure adapters: image caches and network transports.

pub mod cache;
pub mod transport;

pub use cache::InMemoryImageCache;
#[cfg(feature = "http")]
pub use transport::HttpTransport;

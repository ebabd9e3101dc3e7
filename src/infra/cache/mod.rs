//! Image cache implementations.

pub mod memory;

pub use memory::InMemoryImageCache;

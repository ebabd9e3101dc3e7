//! Core loading abstractions: tasks, admission control, transfer routing, and processors.

pub mod admission;
pub mod cache;
pub mod decoder;
pub mod error;
pub mod image;
pub mod loader;
pub mod manager;
pub mod processor;
pub mod request;
pub mod spawn;
pub mod task;

pub use admission::{congestion_delay, AdmissionQueue, CancelOutcome, QueueSnapshot};
pub use cache::ImageCaching;
pub use decoder::{DecodeRejection, ImageDecoder, ImageDecoding};
pub use error::{AppResult, ConfigError, LoadError, TransportError};
pub use image::{ContentMode, Image, Size};
pub use loader::{
    DataLoader, DataTransport, ResponseMetadata, Transfer, TransferEvents, TransportHandle,
};
pub use manager::ImageManager;
pub use processor::{
    ClosureProcessor, GaussianBlurProcessor, ImageProcessing, ProcessorComposition,
    ResizeProcessor,
};
pub use request::{ImageRequest, ImageRequestKey, MemoryCachePolicy};
pub use spawn::Spawn;
pub use task::{ImageResponse, ImageResponseInfo, ImageTask, Progress, TaskState};

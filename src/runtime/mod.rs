//! Runtime adapters and view-facing loading helpers.

pub mod loading_controller;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_spawner;

pub use loading_controller::ImageLoadingController;
#[cfg(feature = "tokio-runtime")]
pub use tokio_spawner::TokioSpawner;

//! # Prometheus Image Loader
//!
//! An admission-controlled image loading pipeline with cancellable, resumable tasks.
//!
//! A caller describes what it wants with an [`ImageRequest`](core::ImageRequest) (URL, target
//! size, content mode, and an ordered list of processors), obtains an
//! [`ImageTask`](core::ImageTask) from an [`ImageManager`](core::ImageManager), and resumes it.
//! The manager fetches bytes through a pluggable transport, decodes them, runs the processor
//! composition, and delivers exactly one terminal response to every registered completion
//! handler.
//!
//! ## Core Problem Solved
//!
//! Image-heavy clients issue far more logical requests than the network stack can serve at
//! once, and they cancel most of them (rows scroll off screen, views get reused):
//!
//! - **Bounded concurrency**: at most `max_concurrent_transfers` physical fetches run at once
//! - **Congestion control**: starts are throttled, not just counted, so the transport is never
//!   flooded with session starts
//! - **Race-free cancellation**: a cancel racing a natural completion yields exactly one response
//! - **Semantic cache keys**: two separately built processor pipelines that produce the same
//!   output share a cached result
//!
//! ## Pipeline
//!
//! ```text
//! ImageTask::resume ──► AdmissionQueue ──► DataTransport (fetch)
//!                                              │ bytes / completion
//!                                              ▼
//!                      ImageTask ◄── processors ◄── decoder ◄── DataLoader (handler table)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use prometheus_image_loader::builders::ImageManagerBuilder;
//! use prometheus_image_loader::config::ImageManagerConfig;
//! use prometheus_image_loader::core::{ContentMode, ImageRequest, Size};
//! use prometheus_image_loader::runtime::TokioSpawner;
//!
//! let manager = ImageManagerBuilder::new(
//!     ImageManagerConfig::default(),
//!     TokioSpawner::new(tokio::runtime::Handle::current()),
//! )
//! .build()?;
//!
//! let request = ImageRequest::parse("https://example.com/cat.jpg")?
//!     .with_target_size(Size::new(200, 200), ContentMode::AspectFill);
//!
//! // The manager holds tasks weakly: keep the handle until the response arrives.
//! let task = manager.task_with(request);
//! task.completion(|response| println!("loaded: {}", response.is_success()))
//!     .resume();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core loading abstractions: tasks, admission control, transfers, and processors.
pub mod core;
/// Configuration models for the manager, queue, transport, and caches.
pub mod config;
/// Builders to construct image managers from configuration.
pub mod builders;
/// Infrastructure adapters for transports and image caches.
pub mod infra;
/// Runtime adapters and view-facing loading controllers.
pub mod runtime;
/// Shared utilities.
pub mod util;

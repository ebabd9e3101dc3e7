//! Image requests and their canonical cache keys.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use super::image::{ContentMode, Size};
use super::processor::{ImageProcessing, ProcessorComposition, ResizeProcessor};
use crate::util::serde::Priority;

/// Whether a request may be satisfied from the memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCachePolicy {
    /// Return a cached image if one exists, otherwise load it.
    #[default]
    ReturnCachedImageElseLoad,
    /// Always load, ignoring any cached image. The result still populates the cache.
    ReloadIgnoringCachedImage,
}

/// Immutable description of which image to load and how to process it.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    url: Url,
    target_size: Size,
    content_mode: ContentMode,
    processors: ProcessorComposition,
    priority: Priority,
    memory_cache_policy: MemoryCachePolicy,
    should_decompress: bool,
}

impl ImageRequest {
    /// Request the image at `url` at its full size.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            target_size: Size::MAX,
            content_mode: ContentMode::AspectFill,
            processors: ProcessorComposition::default(),
            priority: Priority::Normal,
            memory_cache_policy: MemoryCachePolicy::default(),
            should_decompress: true,
        }
    }

    /// Parse `url` and request the image at its full size.
    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Url::parse(url).map(Self::new)
    }

    /// Set the target size and content mode.
    #[must_use]
    pub fn with_target_size(mut self, target_size: Size, content_mode: ContentMode) -> Self {
        self.target_size = target_size;
        self.content_mode = content_mode;
        self
    }

    /// Append a processor to the request's composition.
    #[must_use]
    pub fn with_processor<P: ImageProcessing>(mut self, processor: P) -> Self {
        self.processors = self.processors.with(processor);
        self
    }

    /// Replace the request's processors.
    #[must_use]
    pub fn with_processors(mut self, processors: ProcessorComposition) -> Self {
        self.processors = processors;
        self
    }

    /// Set the transport priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the memory cache policy.
    #[must_use]
    pub fn with_memory_cache_policy(mut self, policy: MemoryCachePolicy) -> Self {
        self.memory_cache_policy = policy;
        self
    }

    /// Enable or disable the leading resize (decompression) step.
    #[must_use]
    pub fn with_should_decompress(mut self, should_decompress: bool) -> Self {
        self.should_decompress = should_decompress;
        self
    }

    /// Source URL.
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Target size in pixels.
    pub const fn target_size(&self) -> Size {
        self.target_size
    }

    /// Content mode used when resizing.
    pub const fn content_mode(&self) -> ContentMode {
        self.content_mode
    }

    /// Processors supplied by the caller.
    pub const fn processors(&self) -> &ProcessorComposition {
        &self.processors
    }

    /// Transport priority.
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Memory cache policy.
    pub const fn memory_cache_policy(&self) -> MemoryCachePolicy {
        self.memory_cache_policy
    }

    /// Whether a resize step is prepended to the processors.
    pub const fn should_decompress(&self) -> bool {
        self.should_decompress
    }

    /// Composition actually applied to the decoded image.
    pub fn effective_processor(&self) -> ProcessorComposition {
        if self.should_decompress {
            let resize = ResizeProcessor::new(self.target_size, self.content_mode);
            self.processors.prepending(Arc::new(resize))
        } else {
            self.processors.clone()
        }
    }

    /// Returns true if both requests are guaranteed to produce the same processed image.
    pub fn is_cache_equivalent(&self, other: &Self) -> bool {
        self.url == other.url
            && self.target_size == other.target_size
            && self.content_mode == other.content_mode
            && self.should_decompress == other.should_decompress
            && self.processors == other.processors
    }

    /// Canonical key for the image cache.
    pub fn cache_key(&self) -> ImageRequestKey {
        ImageRequestKey(self.clone())
    }
}

/// Hashable cache key wrapping a request.
///
/// Equality is cache equivalence: processors are compared with
/// [`ImageProcessing::is_equivalent`], so independently built but equivalent pipelines produce
/// equal keys. The hash covers only the plain fields and the processor count, which keeps it
/// consistent with that equality.
#[derive(Debug, Clone)]
pub struct ImageRequestKey(ImageRequest);

impl ImageRequestKey {
    /// Request this key was derived from.
    pub const fn request(&self) -> &ImageRequest {
        &self.0
    }
}

impl PartialEq for ImageRequestKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.is_cache_equivalent(&other.0)
    }
}

impl Eq for ImageRequestKey {}

impl Hash for ImageRequestKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.url.hash(state);
        self.0.target_size.hash(state);
        self.0.content_mode.hash(state);
        self.0.should_decompress.hash(state);
        self.0.processors.len().hash(state);
    }
}

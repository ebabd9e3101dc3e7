//! Image processors, ordered composition, and processor equivalence.
//!
//! Processors are compared by *declared* equivalence rather than by hashing their output: two
//! processors are equivalent if they are guaranteed to produce the same image for the same
//! input. The cache layer relies on this relation to decide whether a previously processed image
//! can satisfy a new request.
//!
//! Three strategies are provided for implementors of [`ImageProcessing::is_equivalent`]:
//!
//! - [`same_kind`]: any two instances of a parameterless processor type are equivalent
//! - [`equal_parameters`]: instances are equivalent when their parameters compare equal
//! - [`ClosureProcessor`]: opaque transformations are equivalent when their identifiers match

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use image::imageops::FilterType;

use super::image::{ContentMode, Image, Size};

/// A pure image-to-image transformation with an equivalence test.
pub trait ImageProcessing: Send + Sync + 'static {
    /// Returns the processed image, or `None` if processing failed.
    fn process(&self, image: Image) -> Option<Image>;

    /// Returns true if `other` produces the same output as `self` for every input.
    fn is_equivalent(&self, other: &dyn ImageProcessing) -> bool;

    /// Upcast used by equivalence checks to inspect the concrete processor type.
    fn as_any(&self) -> &dyn Any;
}

/// Equivalence for processors without parameters: any processor of type `T` is equivalent.
pub fn same_kind<T: ImageProcessing>(other: &dyn ImageProcessing) -> bool {
    other.as_any().is::<T>()
}

/// Equivalence for parameterised processors: same type and equal parameters.
pub fn equal_parameters<T>(this: &T, other: &dyn ImageProcessing) -> bool
where
    T: ImageProcessing + PartialEq,
{
    other
        .as_any()
        .downcast_ref::<T>()
        .is_some_and(|other| other == this)
}

/// Ordered composition of processors.
///
/// Processing feeds each processor's output into the next one and stops at the first failure.
/// Two compositions are equivalent if they have the same length and their processors are
/// pairwise equivalent at every position; order matters.
#[derive(Clone, Default)]
pub struct ProcessorComposition {
    processors: Vec<Arc<dyn ImageProcessing>>,
}

impl ProcessorComposition {
    /// Compose the given processors in order.
    pub fn new(processors: Vec<Arc<dyn ImageProcessing>>) -> Self {
        Self { processors }
    }

    /// Append a processor, returning the extended composition.
    #[must_use]
    pub fn with<P: ImageProcessing>(mut self, processor: P) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Append a shared processor.
    pub fn push(&mut self, processor: Arc<dyn ImageProcessing>) {
        self.processors.push(processor);
    }

    /// Returns a copy of this composition with `processor` placed first.
    #[must_use]
    pub fn prepending(&self, processor: Arc<dyn ImageProcessing>) -> Self {
        let mut processors = Vec::with_capacity(self.processors.len() + 1);
        processors.push(processor);
        processors.extend(self.processors.iter().cloned());
        Self { processors }
    }

    /// Processors in application order.
    pub fn processors(&self) -> &[Arc<dyn ImageProcessing>] {
        &self.processors
    }

    /// Number of processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns true if the composition has no processors.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl ImageProcessing for ProcessorComposition {
    fn process(&self, image: Image) -> Option<Image> {
        self.processors
            .iter()
            .try_fold(image, |image, processor| processor.process(image))
    }

    fn is_equivalent(&self, other: &dyn ImageProcessing) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PartialEq for ProcessorComposition {
    fn eq(&self, other: &Self) -> bool {
        self.processors.len() == other.processors.len()
            && self
                .processors
                .iter()
                .zip(&other.processors)
                .all(|(lhs, rhs)| lhs.is_equivalent(rhs.as_ref()))
    }
}

impl fmt::Debug for ProcessorComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorComposition")
            .field("len", &self.processors.len())
            .finish()
    }
}

/// Downscales (never upscales) an image to fit or fill a target size.
///
/// This is also the decompression step the manager prepends to every request that asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeProcessor {
    /// Target size in pixels.
    pub target_size: Size,
    /// How the image is fitted into the target size.
    pub content_mode: ContentMode,
}

impl ResizeProcessor {
    /// Create a resize step.
    pub const fn new(target_size: Size, content_mode: ContentMode) -> Self {
        Self {
            target_size,
            content_mode,
        }
    }

    /// Size the image will have after this step.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn scaled_size(&self, source: Size) -> Size {
        if source.width == 0 || source.height == 0 {
            return source;
        }
        let horizontal = f64::from(self.target_size.width) / f64::from(source.width);
        let vertical = f64::from(self.target_size.height) / f64::from(source.height);
        let scale = match self.content_mode {
            ContentMode::AspectFill => horizontal.max(vertical),
            ContentMode::AspectFit => horizontal.min(vertical),
        };
        let minification = scale.min(1.0);
        Size {
            width: ((minification * f64::from(source.width)).round() as u32).max(1),
            height: ((minification * f64::from(source.height)).round() as u32).max(1),
        }
    }
}

impl Default for ResizeProcessor {
    fn default() -> Self {
        Self::new(Size::MAX, ContentMode::AspectFill)
    }
}

impl ImageProcessing for ResizeProcessor {
    fn process(&self, image: Image) -> Option<Image> {
        let target = self.scaled_size(image.size());
        if target == image.size() {
            return Some(image);
        }
        let resized = image
            .as_dynamic()
            .resize_exact(target.width, target.height, FilterType::Triangle);
        Some(Image::new(resized))
    }

    fn is_equivalent(&self, other: &dyn ImageProcessing) -> bool {
        equal_parameters(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Gaussian blur with a fixed radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GaussianBlurProcessor {
    /// Blur radius in pixels.
    pub radius: u32,
}

impl GaussianBlurProcessor {
    /// Create a blur step with the given radius.
    pub const fn new(radius: u32) -> Self {
        Self { radius }
    }
}

impl Default for GaussianBlurProcessor {
    fn default() -> Self {
        Self::new(8)
    }
}

impl ImageProcessing for GaussianBlurProcessor {
    #[allow(clippy::cast_precision_loss)]
    fn process(&self, image: Image) -> Option<Image> {
        if self.radius == 0 {
            return Some(image);
        }
        Some(Image::new(image.as_dynamic().blur(self.radius as f32)))
    }

    fn is_equivalent(&self, other: &dyn ImageProcessing) -> bool {
        equal_parameters(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type ProcessClosure = dyn Fn(Image) -> Option<Image> + Send + Sync;

/// Anonymous processor backed by a closure.
///
/// The closure is opaque, so equivalence is decided by the caller-assigned identifier alone:
/// processors with equivalent closures must share an identifier.
#[derive(Clone)]
pub struct ClosureProcessor {
    identifier: String,
    closure: Arc<ProcessClosure>,
}

impl ClosureProcessor {
    /// Create a processor from an identifier and a closure.
    pub fn new<F>(identifier: impl Into<String>, closure: F) -> Self
    where
        F: Fn(Image) -> Option<Image> + Send + Sync + 'static,
    {
        Self {
            identifier: identifier.into(),
            closure: Arc::new(closure),
        }
    }

    /// Identifier used for equivalence.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl ImageProcessing for ClosureProcessor {
    fn process(&self, image: Image) -> Option<Image> {
        (self.closure)(image)
    }

    fn is_equivalent(&self, other: &dyn ImageProcessing) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| other.identifier == self.identifier)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for ClosureProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureProcessor")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

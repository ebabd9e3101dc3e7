//! Decoded image value and target geometry.

use std::fmt;
use std::sync::Arc;

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

/// Size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Largest representable size; requests with this target size are never downscaled.
    pub const MAX: Self = Self {
        width: u32::MAX,
        height: u32::MAX,
    };

    /// Create a size from width and height.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// How an image is scaled to its target size. Aspect ratio is always preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    /// Scale so the image covers the whole target size; one dimension may overflow.
    #[default]
    AspectFill,
    /// Scale so the whole image fits inside the target size.
    AspectFit,
}

/// A decoded image, cheap to clone and share between tasks and caches.
#[derive(Clone)]
pub struct Image {
    inner: Arc<DynamicImage>,
}

impl Image {
    /// Wrap a decoded image.
    pub fn new(image: DynamicImage) -> Self {
        Self {
            inner: Arc::new(image),
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.inner.dimensions().0
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.inner.dimensions().1
    }

    /// Dimensions in pixels.
    pub fn size(&self) -> Size {
        let (width, height) = self.inner.dimensions();
        Size { width, height }
    }

    /// Borrow the underlying decoded image.
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.inner
    }

    /// Take the underlying image, cloning the pixels only if the image is shared.
    pub fn into_dynamic(self) -> DynamicImage {
        Arc::try_unwrap(self.inner).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Returns true if both values share the same pixel storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<DynamicImage> for Image {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

//! Turning downloaded bytes into images.

use std::io::Cursor;

use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::image::Image;
use super::loader::ResponseMetadata;

/// Decodes downloaded bytes into an [`Image`].
pub trait ImageDecoding: Send + Sync + 'static {
    /// Decode `data`. Returns `None` if the bytes are not a supported image.
    fn decode(&self, data: &[u8], metadata: &ResponseMetadata) -> Option<Image>;
}

/// Decoder backed by the `image` crate. The format is sniffed from the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageDecoder {
    /// Reject images with more pixels than this.
    pub max_pixels: Option<u64>,
}

impl ImageDecoder {
    /// Decoder without a pixel limit.
    pub const fn new() -> Self {
        Self { max_pixels: None }
    }

    /// Decoder rejecting images larger than `max_pixels`.
    pub const fn with_max_pixels(max_pixels: u64) -> Self {
        Self {
            max_pixels: Some(max_pixels),
        }
    }
}

/// Why [`ImageDecoder::decode_checked`] produced no image.
#[derive(Debug)]
pub enum DecodeRejection {
    /// The header announces more pixels than the configured limit.
    TooLarge {
        /// Pixels announced by the header.
        pixels: u64,
        /// Configured limit.
        limit: u64,
    },
    /// The bytes are not a supported or well-formed image.
    Invalid(image::ImageError),
}

impl ImageDecoder {
    /// Decode `data`, checking the pixel limit against the header before any pixel data is
    /// allocated.
    pub fn decode_checked(&self, data: &[u8]) -> Result<DynamicImage, DecodeRejection> {
        if let Some(limit) = self.max_pixels {
            let (width, height) = Self::reader(data)
                .and_then(ImageReader::into_dimensions)
                .map_err(DecodeRejection::Invalid)?;
            let pixels = u64::from(width) * u64::from(height);
            if pixels > limit {
                return Err(DecodeRejection::TooLarge { pixels, limit });
            }
        }
        Self::reader(data)
            .and_then(ImageReader::decode)
            .map_err(DecodeRejection::Invalid)
    }

    fn reader(data: &[u8]) -> image::ImageResult<ImageReader<Cursor<&[u8]>>> {
        Ok(ImageReader::new(Cursor::new(data)).with_guessed_format()?)
    }
}

impl ImageDecoding for ImageDecoder {
    fn decode(&self, data: &[u8], metadata: &ResponseMetadata) -> Option<Image> {
        if data.is_empty() {
            return None;
        }
        match self.decode_checked(data) {
            Ok(decoded) => Some(Image::new(decoded)),
            Err(DecodeRejection::TooLarge { pixels, limit }) => {
                warn!(pixels, limit, "image exceeds pixel limit");
                None
            }
            Err(DecodeRejection::Invalid(err)) => {
                debug!(
                    bytes = data.len(),
                    content_type = metadata.content_type.as_deref().unwrap_or("unknown"),
                    error = %err,
                    "failed to decode image"
                );
                None
            }
        }
    }
}

//! Memory cache abstraction for processed images.

use super::image::Image;
use super::request::ImageRequestKey;

/// Stores processed images keyed by cache-equivalent requests.
///
/// Implementations are shared between the manager and its callers, so they synchronize
/// internally.
pub trait ImageCaching: Send + Sync + 'static {
    /// Look up the image for `key`.
    fn get(&self, key: &ImageRequestKey) -> Option<Image>;

    /// Store `image` for `key`, replacing any previous entry.
    fn insert(&self, key: ImageRequestKey, image: Image);

    /// Remove the entry for `key`, returning it.
    fn remove(&self, key: &ImageRequestKey) -> Option<Image>;

    /// Remove every entry.
    fn clear(&self);

    /// Number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! In-memory image cache with a bounded entry count.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tracing::trace;

use crate::core::cache::ImageCaching;
use crate::core::image::Image;
use crate::core::request::ImageRequestKey;

struct CacheState {
    entries: HashMap<ImageRequestKey, Image>,
    order: VecDeque<ImageRequestKey>,
}

/// In-memory cache evicting the least recently inserted image once full.
pub struct InMemoryImageCache {
    state: Mutex<CacheState>,
    max_items: usize,
}

impl InMemoryImageCache {
    /// Create a cache holding at most `max_items` images (at least one).
    pub fn new(max_items: usize) -> Self {
        let max_items = max_items.max(1);
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(max_items.min(1024)),
                order: VecDeque::new(),
            }),
            max_items,
        }
    }

    /// Maximum number of images kept.
    pub const fn max_items(&self) -> usize {
        self.max_items
    }
}

impl ImageCaching for InMemoryImageCache {
    fn get(&self, key: &ImageRequestKey) -> Option<Image> {
        self.state.lock().entries.get(key).cloned()
    }

    fn insert(&self, key: ImageRequestKey, image: Image) {
        let mut state = self.state.lock();
        if state.entries.insert(key.clone(), image).is_some() {
            state.order.retain(|existing| existing != &key);
        }
        state.order.push_back(key);
        while state.entries.len() > self.max_items {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            trace!(url = %oldest.request().url(), "evicted cached image");
        }
    }

    fn remove(&self, key: &ImageRequestKey) -> Option<Image> {
        let mut state = self.state.lock();
        let removed = state.entries.remove(key);
        if removed.is_some() {
            state.order.retain(|existing| existing != key);
        }
        removed
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

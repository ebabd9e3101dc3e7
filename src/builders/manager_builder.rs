//! Builder wiring an image manager from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::ImageManagerConfig;
use crate::core::{
    AdmissionQueue, AppResult, DataLoader, DataTransport, ImageCaching, ImageDecoding,
    ImageManager, Spawn,
};
use crate::infra::cache::InMemoryImageCache;

/// Builds an [`ImageManager`] from an [`ImageManagerConfig`] and optional collaborator overrides.
///
/// Without an explicit transport the builder creates an
/// [`HttpTransport`](crate::infra::HttpTransport) on the current tokio runtime (requires the
/// `http` feature).
pub struct ImageManagerBuilder<S> {
    config: ImageManagerConfig,
    spawner: S,
    transport: Option<Arc<dyn DataTransport>>,
    decoder: Option<Arc<dyn ImageDecoding>>,
    cache: Option<Option<Arc<dyn ImageCaching>>>,
}

impl<S> ImageManagerBuilder<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    /// Start from `config`, running background work on `spawner`.
    pub const fn new(config: ImageManagerConfig, spawner: S) -> Self {
        Self {
            config,
            spawner,
            transport: None,
            decoder: None,
            cache: None,
        }
    }

    /// Use `transport` for fetches.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn DataTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `decoder` instead of the configured [`ImageDecoder`](crate::core::ImageDecoder).
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoding>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Use `cache` as the memory cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ImageCaching>) -> Self {
        self.cache = Some(Some(cache));
        self
    }

    /// Disable the memory cache.
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache = Some(None);
        self
    }

    /// Validate the configuration and wire the manager.
    pub fn build(self) -> AppResult<ImageManager<S>> {
        self.config
            .validate()
            .context("invalid image manager configuration")?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config)?,
        };
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(self.config.decoder.clone()) as Arc<dyn ImageDecoding>);
        let cache = self.cache.unwrap_or_else(|| {
            (self.config.cache.memory_cache_items > 0).then(|| {
                Arc::new(InMemoryImageCache::new(self.config.cache.memory_cache_items))
                    as Arc<dyn ImageCaching>
            })
        });

        info!(
            max_concurrent = self.config.queue.max_concurrent_transfers,
            congestion_control = self.config.queue.congestion_control_enabled,
            memory_cache = cache.is_some(),
            "image manager configured"
        );

        let queue = AdmissionQueue::new(&self.config.queue, self.spawner.clone());
        Ok(ImageManager::new(
            DataLoader::new(transport),
            queue,
            decoder,
            cache,
            self.spawner,
        ))
    }
}

#[cfg(feature = "http")]
fn default_transport(config: &ImageManagerConfig) -> AppResult<Arc<dyn DataTransport>> {
    let runtime = tokio::runtime::Handle::try_current()
        .context("the default http transport needs a tokio runtime")?;
    let transport = crate::infra::HttpTransport::new(&config.transport, runtime)?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "http"))]
fn default_transport(_config: &ImageManagerConfig) -> AppResult<Arc<dyn DataTransport>> {
    anyhow::bail!("no transport configured and the `http` feature is disabled")
}

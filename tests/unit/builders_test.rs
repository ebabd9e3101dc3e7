//! Tests for the image manager builder

use std::sync::Arc;

use prometheus_image_loader::builders::ImageManagerBuilder;
use prometheus_image_loader::config::ImageManagerConfig;
use prometheus_image_loader::core::ImageDecoder;
use prometheus_image_loader::infra::InMemoryImageCache;

use crate::common::{png, request, InlineSpawner, MockTransport};

fn sync_config() -> ImageManagerConfig {
    let mut config = ImageManagerConfig::default();
    config.queue.congestion_control_enabled = false;
    config.queue.max_concurrent_transfers = 3;
    config
}

#[test]
fn test_builder_applies_queue_config() {
    let transport = MockTransport::new();
    let manager = ImageManagerBuilder::new(sync_config(), InlineSpawner)
        .with_transport(transport)
        .build()
        .unwrap();
    assert_eq!(manager.queue().executing_cap(), 3);
    assert!(!manager.queue().congestion_control_enabled());
    assert!(manager.cache().is_some());
}

#[test]
fn test_builder_rejects_invalid_config() {
    let mut config = sync_config();
    config.queue.max_concurrent_transfers = 0;
    let result = ImageManagerBuilder::new(config, InlineSpawner)
        .with_transport(MockTransport::new())
        .build();
    assert!(result.is_err());
}

#[test]
fn test_builder_without_cache() {
    let transport = MockTransport::new();
    let manager = ImageManagerBuilder::new(sync_config(), InlineSpawner)
        .with_transport(transport.clone())
        .without_cache()
        .build()
        .unwrap();
    assert!(manager.cache().is_none());

    let task = manager.task_with(request("a.png"));
    task.resume();
    transport.last().respond(&png(1, 1));
    assert!(task.response().is_some_and(|response| response.is_success()));
    assert!(manager.cached_response(&request("a.png")).is_none());
}

#[test]
fn test_builder_custom_collaborators() {
    let cache = Arc::new(InMemoryImageCache::new(1));
    let manager = ImageManagerBuilder::new(sync_config(), InlineSpawner)
        .with_transport(MockTransport::new())
        .with_decoder(Arc::new(ImageDecoder::with_max_pixels(4)))
        .with_cache(cache.clone())
        .build()
        .unwrap();
    assert!(manager.cache().is_some());
    assert_eq!(cache.max_items(), 1);
}

#[tokio::test]
async fn test_builder_defaults_to_http_transport_inside_runtime() {
    let spawner = prometheus_image_loader::runtime::TokioSpawner::current().unwrap();
    let manager = ImageManagerBuilder::new(ImageManagerConfig::default(), spawner).build();
    assert!(manager.is_ok());
}

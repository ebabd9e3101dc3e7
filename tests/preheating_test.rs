//! Integration tests for preheating and the loading controller

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use prometheus_image_loader::core::{ContentMode, GaussianBlurProcessor, ImageResponse, Size};
use prometheus_image_loader::runtime::ImageLoadingController;

use common::{inline_manager, png, request};

// ============================================================================
// PREHEATING
// ============================================================================

#[test]
fn test_preheating_fills_memory_cache() {
    let (manager, transport) = inline_manager(4);
    manager.start_preheating(vec![request("a.png"), request("b.png")]);
    assert_eq!(manager.preheating_count(), 2);
    assert_eq!(transport.stats.started(), 2);

    for handle in transport.handles() {
        handle.respond(&png(2, 2));
    }
    assert_eq!(manager.preheating_count(), 0);
    assert!(manager.cached_response(&request("a.png")).is_some());
    assert!(manager.cached_response(&request("b.png")).is_some());
}

#[test]
fn test_preheating_deduplicates_equivalent_requests() {
    let (manager, transport) = inline_manager(4);
    let blurred = || {
        request("a.png")
            .with_target_size(Size::new(10, 10), ContentMode::AspectFill)
            .with_processor(GaussianBlurProcessor::new(2))
    };
    manager.start_preheating(vec![blurred(), blurred()]);
    manager.start_preheating(vec![blurred()]);

    assert_eq!(manager.preheating_count(), 1);
    assert_eq!(transport.stats.opened.load(Ordering::SeqCst), 1);

    // A different processor chain is a different cache entry.
    manager.start_preheating(vec![request("a.png")]);
    assert_eq!(manager.preheating_count(), 2);
}

#[test]
fn test_stop_preheating_cancels_tasks() {
    let (manager, transport) = inline_manager(1);
    manager.start_preheating(vec![request("a.png"), request("b.png"), request("c.png")]);
    assert_eq!(manager.queue().pending_count(), 2);

    manager.stop_preheating(&[request("b.png")]);
    assert_eq!(manager.preheating_count(), 2);
    assert_eq!(manager.queue().pending_count(), 1);

    manager.stop_preheating_all();
    assert_eq!(manager.preheating_count(), 0);
    assert_eq!(manager.queue().executing_count(), 0);
    assert_eq!(manager.queue().pending_count(), 0);
    // Every fetch that got started was cancelled.
    assert_eq!(transport.stats.running(), 0);
    assert!(transport.stats.cancelled() >= 1);
    assert_eq!(manager.loader().live_transfer_count(), 0);
}

// ============================================================================
// LOADING CONTROLLER
// ============================================================================

fn recorder() -> (
    Arc<Mutex<Vec<ImageResponse>>>,
    impl Fn(ImageResponse) + Send + Sync + 'static,
) {
    let responses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&responses);
    (responses, move |response| sink.lock().push(response))
}

#[test]
fn test_controller_forwards_only_current_response() {
    let (manager, transport) = inline_manager(4);
    let (responses, handler) = recorder();
    let controller = ImageLoadingController::new(manager, handler);

    controller.set_image_with(request("old.png"));
    let old = transport.last();
    controller.set_image_with(request("new.png"));
    let new = transport.last();

    assert!(old.is_finished());
    old.respond(&png(2, 2));
    assert!(responses.lock().is_empty());

    new.respond(&png(3, 3));
    let responses = responses.lock();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].image().map(|image| image.width()), Some(3));
    assert!(controller.current_task().is_none());
}

#[test]
fn test_controller_serves_cache_hits_synchronously() {
    let (manager, transport) = inline_manager(4);
    let warm = manager.task_with(request("warm.png"));
    warm.resume();
    transport.last().respond(&png(2, 2));

    let (responses, handler) = recorder();
    let controller = ImageLoadingController::new(manager, handler);
    controller.set_image_with(request("warm.png"));

    assert_eq!(transport.stats.opened.load(Ordering::SeqCst), 1);
    assert!(matches!(
        responses.lock().first(),
        Some(ImageResponse::Success { info, .. }) if info.is_fast_response
    ));
}

#[test]
fn test_dropping_controller_cancels_loading() {
    let (manager, transport) = inline_manager(4);
    let (responses, handler) = recorder();
    let controller = ImageLoadingController::new(manager.clone(), handler);
    controller.set_image_with(request("gone.png"));
    assert_eq!(manager.queue().executing_count(), 1);

    drop(controller);
    assert_eq!(manager.queue().executing_count(), 0);
    assert_eq!(transport.stats.cancelled(), 1);
    assert!(responses.lock().is_empty());
}

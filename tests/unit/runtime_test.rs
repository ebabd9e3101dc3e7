//! Tests for tokio spawner utilities

use std::time::Duration;

use prometheus_image_loader::core::Spawn;
use prometheus_image_loader::runtime::TokioSpawner;
use prometheus_image_loader::util::init_tracing;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    init_tracing();
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test(start_paused = true)]
async fn test_tokio_spawner_spawn_after_waits() {
    let spawner = TokioSpawner::current().expect("inside a tokio runtime");
    let start = tokio::time::Instant::now();

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn_after(Duration::from_millis(25), async move {
        tx.send(tokio::time::Instant::now()).unwrap();
    });

    let fired = rx.await.expect("oneshot result");
    assert!(fired - start >= Duration::from_millis(25));
}

#[test]
fn test_current_outside_runtime_is_none() {
    assert!(TokioSpawner::current().is_none());
}

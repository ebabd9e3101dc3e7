//! Tests for configuration parsing and validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_image_loader::config::manager::{
    ENV_CONGESTION_CONTROL, ENV_MAX_CONCURRENT, ENV_MEMORY_CACHE_ITEMS,
};
use prometheus_image_loader::config::{ImageManagerConfig, QueueConfig, TransportConfig};
use prometheus_image_loader::core::ConfigError;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = ImageManagerConfig::default();
    assert_eq!(config.queue.max_concurrent_transfers, 8);
    assert!(config.queue.congestion_control_enabled);
    assert_eq!(config.transport.request_timeout(), Duration::from_secs(60));
    assert_eq!(config.transport.resource_timeout(), Duration::from_secs(360));
    assert_eq!(config.transport.response_cache_bytes, 200 * 1024 * 1024);
    assert!(config.validate().is_ok());
}

#[test]
fn test_zero_cap_is_invalid() {
    let queue = QueueConfig {
        max_concurrent_transfers: 0,
        congestion_control_enabled: true,
    };
    assert!(matches!(queue.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_resource_timeout_shorter_than_request_timeout_is_invalid() {
    let transport = TransportConfig {
        request_timeout_secs: 60,
        resource_timeout_secs: 30,
        ..TransportConfig::default()
    };
    assert!(transport.validate().is_err());
}

#[test]
fn test_from_json_str_fills_missing_fields() {
    let config = ImageManagerConfig::from_json_str(
        r#"{ "queue": { "max_concurrent_transfers": 4 }, "cache": { "memory_cache_items": 10 } }"#,
    )
    .unwrap();
    assert_eq!(config.queue.max_concurrent_transfers, 4);
    assert!(config.queue.congestion_control_enabled);
    assert_eq!(config.cache.memory_cache_items, 10);
    assert_eq!(config.transport, TransportConfig::default());
}

#[test]
fn test_from_json_str_rejects_invalid_documents() {
    assert!(matches!(
        ImageManagerConfig::from_json_str("{ not json"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        ImageManagerConfig::from_json_str(r#"{ "queue": { "max_concurrent_transfers": 0 } }"#),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_environment_overrides() {
    let config = ImageManagerConfig::from_lookup(lookup(&[
        (ENV_MAX_CONCURRENT, "3"),
        (ENV_CONGESTION_CONTROL, "off"),
        (ENV_MEMORY_CACHE_ITEMS, " 0 "),
    ]))
    .unwrap();
    assert_eq!(config.queue.max_concurrent_transfers, 3);
    assert!(!config.queue.congestion_control_enabled);
    assert_eq!(config.cache.memory_cache_items, 0);
}

#[test]
fn test_environment_rejects_garbage() {
    let err = ImageManagerConfig::from_lookup(lookup(&[(ENV_CONGESTION_CONTROL, "sometimes")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Env { ref key, .. } if key == ENV_CONGESTION_CONTROL));
}

//! Tests for error types

use prometheus_image_loader::core::{ConfigError, LoadError, TransportError};

#[test]
fn test_load_error_messages() {
    assert_eq!(LoadError::Cancelled.to_string(), "image task was cancelled");
    assert_eq!(LoadError::DecodingFailed.to_string(), "failed to decode image data");
    assert_eq!(LoadError::ProcessingFailed.to_string(), "failed to process image");
}

#[test]
fn test_transport_error_messages() {
    assert_eq!(
        TransportError::Status(503).to_string(),
        "unexpected http status 503"
    );
    assert_eq!(
        TransportError::Network("connection reset".into()).to_string(),
        "network error: connection reset"
    );
}

#[test]
fn test_transport_error_is_source_of_load_error() {
    let err = LoadError::from(TransportError::TimedOut);
    assert_eq!(err, LoadError::Transport(TransportError::TimedOut));
    let source = std::error::Error::source(&err).map(ToString::to_string);
    assert_eq!(source.as_deref(), Some("transfer timed out"));
}

#[test]
fn test_cancelled_transfer_maps_to_cancelled_task() {
    assert_eq!(LoadError::from(TransportError::Cancelled), LoadError::Cancelled);
}

#[test]
fn test_config_env_error_message() {
    let err = ConfigError::Env {
        key: "IMAGE_LOADER_MAX_CONCURRENT".into(),
        value: "many".into(),
    };
    assert_eq!(
        err.to_string(),
        "environment variable `IMAGE_LOADER_MAX_CONCURRENT` has invalid value `many`"
    );
}

//! Tests for shared identifiers and enums

use prometheus_image_loader::util::Priority;

#[test]
fn test_priority_ordering() {
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_priority_serde() {
    assert_eq!(serde_json::to_string(&Priority::Low).unwrap(), "\"low\"");
    let parsed: Priority = serde_json::from_str("\"high\"").unwrap();
    assert_eq!(parsed, Priority::High);
}

#[test]
fn test_init_tracing_is_idempotent() {
    prometheus_image_loader::util::init_tracing();
    prometheus_image_loader::util::init_tracing();
    tracing::debug!("subscriber installed");
}

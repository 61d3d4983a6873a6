//! Tests for error types.

use super::*;

#[test]
fn test_not_opened_message() {
    let err = QueueError::NotOpened;
    assert_eq!(err.to_string(), "The queue is not opened");
    assert!(!err.is_transient());
}

#[test]
fn test_connection_error_carries_queue_identity() {
    let err = QueueError::Connection {
        queue: "orders".to_string(),
        message: "GetQueueUrl failed".to_string(),
    };
    assert!(err.to_string().contains("orders"));
    assert!(err.is_transient());
}

#[test]
fn test_transient_classification() {
    assert!(QueueError::ConnectionFailed {
        message: "timeout".to_string()
    }
    .is_transient());
    assert!(QueueError::Provider {
        code: "InternalError".to_string(),
        message: "retry later".to_string()
    }
    .is_transient());

    assert!(!QueueError::AuthenticationFailed {
        message: "bad key".to_string()
    }
    .is_transient());
    assert!(!QueueError::QueueNotFound {
        queue_name: "missing".to_string()
    }
    .is_transient());
    assert!(!QueueError::MessageNotFound {
        receipt: "stale".to_string()
    }
    .is_transient());
}

#[test]
fn test_configuration_error_conversion() {
    let err: QueueError = ConfigurationError::NoAccessId.into();
    assert!(matches!(err, QueueError::Configuration(_)));
    assert!(!err.is_transient());
    assert!(err.to_string().contains("access_id"));
}

#[test]
fn test_serialization_error_conversion() {
    let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
    let err: QueueError = json_err.into();
    assert!(matches!(err, QueueError::Serialization(_)));
    assert!(!err.is_transient());
}

//! Tests for the SQS queue client.
//!
//! Network calls are not exercised here; coverage targets the request
//! builders, response parsers, error mapping, signing, and the closed-state
//! guards.

use super::*;

fn signer() -> RequestSigner {
    RequestSigner::new(
        "AKIDEXAMPLE".to_string(),
        "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
        "us-east-1".to_string(),
    )
}

fn fixed_timestamp() -> DateTime<Utc> {
    "2026-01-15T10:30:00Z"
        .parse::<DateTime<Utc>>()
        .expect("valid timestamp")
}

// ============================================================================
// Signing
// ============================================================================

#[test]
fn test_sign_produces_required_headers() {
    let mut params = BTreeMap::new();
    params.insert("Action".to_string(), "GetQueueUrl".to_string());
    params.insert("QueueName".to_string(), "orders".to_string());

    let headers = signer().sign(
        "POST",
        "sqs.us-east-1.amazonaws.com",
        "/",
        &params,
        "",
        &fixed_timestamp(),
    );

    assert_eq!(headers.get("host").map(String::as_str), Some("sqs.us-east-1.amazonaws.com"));
    assert_eq!(headers.get("x-amz-date").map(String::as_str), Some("20260115T103000Z"));

    let authorization = headers.get("Authorization").expect("authorization header");
    assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260115/us-east-1/sqs/aws4_request"));
    assert!(authorization.contains("SignedHeaders=host;x-amz-date"));
    assert!(authorization.contains("Signature="));
}

#[test]
fn test_sign_is_deterministic() {
    let mut params = BTreeMap::new();
    params.insert("Action".to_string(), "PurgeQueue".to_string());

    let first = signer().sign("POST", "sqs.us-east-1.amazonaws.com", "/", &params, "", &fixed_timestamp());
    let second = signer().sign("POST", "sqs.us-east-1.amazonaws.com", "/", &params, "", &fixed_timestamp());
    assert_eq!(first, second);
}

#[test]
fn test_sign_varies_with_secret_key() {
    let mut params = BTreeMap::new();
    params.insert("Action".to_string(), "PurgeQueue".to_string());

    let other = RequestSigner::new(
        "AKIDEXAMPLE".to_string(),
        "different-secret".to_string(),
        "us-east-1".to_string(),
    );

    let first = signer().sign("POST", "sqs.us-east-1.amazonaws.com", "/", &params, "", &fixed_timestamp());
    let second = other.sign("POST", "sqs.us-east-1.amazonaws.com", "/", &params, "", &fixed_timestamp());
    assert_ne!(first.get("Authorization"), second.get("Authorization"));
}

#[test]
fn test_canonical_query_sorts_and_encodes() {
    let mut params = BTreeMap::new();
    params.insert("Zebra".to_string(), "last".to_string());
    params.insert("Action".to_string(), "SendMessage".to_string());
    params.insert("MessageBody".to_string(), "a b&c".to_string());

    assert_eq!(
        canonical_query(&params),
        "Action=SendMessage&MessageBody=a%20b%26c&Zebra=last"
    );
}

// ============================================================================
// Request Builders
// ============================================================================

#[test]
fn test_send_message_params_standard_queue() {
    let params = send_message_params("https://sqs.us-east-1.amazonaws.com/123/orders", "body", None, None);

    assert_eq!(params.get("Action").map(String::as_str), Some("SendMessage"));
    assert_eq!(params.get("Version").map(String::as_str), Some(SQS_API_VERSION));
    assert_eq!(params.get("MessageBody").map(String::as_str), Some("body"));
    assert!(!params.contains_key("MessageGroupId"));
    assert!(!params.contains_key("MessageDeduplicationId"));
}

#[test]
fn test_send_message_params_fifo_queue() {
    let params = send_message_params(
        "https://sqs.us-east-1.amazonaws.com/123/orders.fifo",
        "body",
        Some("OrderPlaced"),
        Some("msg-1"),
    );

    assert_eq!(params.get("MessageGroupId").map(String::as_str), Some("OrderPlaced"));
    assert_eq!(params.get("MessageDeduplicationId").map(String::as_str), Some("msg-1"));
}

#[test]
fn test_fifo_keys_standard_queue_has_none() {
    let envelope = MessageEnvelope::new(None, Some("OrderPlaced".to_string()), "{}");
    let (group, deduplication) =
        SqsMessageQueue::fifo_keys(&envelope, false, false).expect("keys");
    assert_eq!(group, None);
    assert_eq!(deduplication, None);
}

#[test]
fn test_fifo_keys_without_content_deduplication() {
    let envelope = MessageEnvelope::new(None, Some("OrderPlaced".to_string()), "{}");
    let (group, deduplication) = SqsMessageQueue::fifo_keys(&envelope, true, false).expect("keys");
    assert_eq!(group, Some("OrderPlaced".to_string()));
    assert_eq!(deduplication, envelope.message_id);
}

#[test]
fn test_fifo_keys_with_content_deduplication_omits_explicit_key() {
    let envelope = MessageEnvelope::new(None, Some("OrderPlaced".to_string()), "{}");
    let (group, deduplication) = SqsMessageQueue::fifo_keys(&envelope, true, true).expect("keys");
    assert_eq!(group, Some("OrderPlaced".to_string()));
    assert_eq!(deduplication, None);
}

#[test]
fn test_fifo_keys_reject_missing_message_type() {
    let envelope = MessageEnvelope::new(None, None, "{}");
    let result = SqsMessageQueue::fifo_keys(&envelope, true, false);
    assert!(matches!(
        result,
        Err(QueueError::Configuration(ConfigurationError::Invalid { .. }))
    ));
}

#[test]
fn test_fifo_keys_reject_empty_message_type() {
    let envelope = MessageEnvelope::new(None, Some(String::new()), "{}");
    let result = SqsMessageQueue::fifo_keys(&envelope, true, true);
    assert!(matches!(
        result,
        Err(QueueError::Configuration(ConfigurationError::Invalid { .. }))
    ));
}

// ============================================================================
// Response Parsers
// ============================================================================

#[test]
fn test_parse_queue_url_response() {
    let xml = r#"<?xml version="1.0"?>
        <GetQueueUrlResponse>
            <GetQueueUrlResult>
                <QueueUrl>https://sqs.us-east-1.amazonaws.com/123456789012/orders</QueueUrl>
            </GetQueueUrlResult>
        </GetQueueUrlResponse>"#;

    let url = parse_queue_url_response(xml).expect("parse queue url");
    assert_eq!(url, "https://sqs.us-east-1.amazonaws.com/123456789012/orders");
}

#[test]
fn test_parse_queue_url_response_missing_element() {
    let xml = "<GetQueueUrlResponse></GetQueueUrlResponse>";
    let result = parse_queue_url_response(xml);
    assert!(matches!(result, Err(SqsError::Parse(_))));
}

#[test]
fn test_parse_send_message_response() {
    let xml = r#"<SendMessageResponse>
            <SendMessageResult>
                <MessageId>5fea7756-0ea4-451a-a703-a558b933e274</MessageId>
                <MD5OfMessageBody>fafb00f5732ab283681e124bf8747ed1</MD5OfMessageBody>
            </SendMessageResult>
        </SendMessageResponse>"#;

    let message_id = parse_send_message_response(xml).expect("parse message id");
    assert_eq!(message_id, "5fea7756-0ea4-451a-a703-a558b933e274");
}

#[test]
fn test_parse_receive_message_response_multiple_messages() {
    let xml = r#"<ReceiveMessageResponse>
            <ReceiveMessageResult>
                <Message>
                    <MessageId>id-1</MessageId>
                    <ReceiptHandle>handle-1</ReceiptHandle>
                    <Body>{"message":"first"}</Body>
                </Message>
                <Message>
                    <MessageId>id-2</MessageId>
                    <ReceiptHandle>handle-2</ReceiptHandle>
                    <Body>{"message":"second"}</Body>
                </Message>
            </ReceiveMessageResult>
        </ReceiveMessageResponse>"#;

    let messages = parse_receive_message_response(xml).expect("parse messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message_id, "id-1");
    assert_eq!(messages[0].receipt_handle, "handle-1");
    assert_eq!(messages[0].body, r#"{"message":"first"}"#);
    assert_eq!(messages[1].message_id, "id-2");
}

#[test]
fn test_parse_receive_message_response_unescapes_entities() {
    let xml = r#"<ReceiveMessageResponse>
            <ReceiveMessageResult>
                <Message>
                    <MessageId>id-1</MessageId>
                    <ReceiptHandle>handle-1</ReceiptHandle>
                    <Body>a &amp; b &lt;tag&gt;</Body>
                </Message>
            </ReceiveMessageResult>
        </ReceiveMessageResponse>"#;

    let messages = parse_receive_message_response(xml).expect("parse messages");
    assert_eq!(messages[0].body, "a & b <tag>");
}

#[test]
fn test_parse_receive_message_response_empty() {
    let xml = "<ReceiveMessageResponse><ReceiveMessageResult/></ReceiveMessageResponse>";
    let messages = parse_receive_message_response(xml).expect("parse messages");
    assert!(messages.is_empty());
}

#[test]
fn test_parse_attributes_response() {
    let xml = r#"<GetQueueAttributesResponse>
            <GetQueueAttributesResult>
                <Attribute>
                    <Name>ContentBasedDeduplication</Name>
                    <Value>true</Value>
                </Attribute>
                <Attribute>
                    <Name>ApproximateNumberOfMessages</Name>
                    <Value>42</Value>
                </Attribute>
            </GetQueueAttributesResult>
        </GetQueueAttributesResponse>"#;

    let attributes = parse_attributes_response(xml);
    assert_eq!(attributes.get("ContentBasedDeduplication").map(String::as_str), Some("true"));
    assert_eq!(attributes.get("ApproximateNumberOfMessages").map(String::as_str), Some("42"));
}

// ============================================================================
// Error Mapping
// ============================================================================

fn error_xml(code: &str, message: &str) -> String {
    format!(
        "<ErrorResponse><Error><Type>Sender</Type><Code>{}</Code><Message>{}</Message></Error></ErrorResponse>",
        code, message
    )
}

#[test]
fn test_parse_error_queue_already_exists() {
    let error = parse_error_response(&error_xml("QueueAlreadyExists", "exists"), 400);
    assert!(matches!(error, SqsError::QueueAlreadyExists(_)));

    let error = parse_error_response(&error_xml("QueueNameExists", "exists"), 400);
    assert!(matches!(error, SqsError::QueueAlreadyExists(_)));
}

#[test]
fn test_parse_error_purge_in_progress() {
    let error = parse_error_response(
        &error_xml("AWS.SimpleQueueService.PurgeQueueInProgress", "retry later"),
        403,
    );
    assert!(matches!(error, SqsError::PurgeInProgress(_)));
}

#[test]
fn test_parse_error_invalid_attribute_name() {
    let error = parse_error_response(&error_xml("InvalidAttributeName", "unknown"), 400);
    assert!(matches!(error, SqsError::InvalidAttributeName(_)));
}

#[test]
fn test_parse_error_queue_not_found() {
    let error = parse_error_response(
        &error_xml("AWS.SimpleQueueService.NonExistentQueue", "no such queue"),
        400,
    );
    assert!(matches!(error, SqsError::QueueNotFound(_)));
}

#[test]
fn test_parse_error_authentication() {
    let error = parse_error_response(&error_xml("SignatureDoesNotMatch", "bad signature"), 403);
    assert!(matches!(error, SqsError::Authentication(_)));

    // An unrecognized code on a 403 still means the credentials were refused
    let error = parse_error_response(&error_xml("SomeOtherCode", "denied"), 403);
    assert!(matches!(error, SqsError::Authentication(_)));
}

#[test]
fn test_parse_error_invalid_receipt() {
    let error = parse_error_response(&error_xml("ReceiptHandleIsInvalid", "expired"), 400);
    assert!(matches!(error, SqsError::InvalidReceipt(_)));
}

#[test]
fn test_parse_error_unknown_code_becomes_service_error() {
    let error = parse_error_response(&error_xml("Throttling", "slow down"), 400);
    match error {
        SqsError::Service { code, message } => {
            assert_eq!(code, "Throttling");
            assert_eq!(message, "slow down");
        }
        other => panic!("expected service error, got {:?}", other),
    }
}

#[test]
fn test_parse_error_unparseable_body() {
    let error = parse_error_response("not xml at all", 500);
    match error {
        SqsError::Service { code, .. } => assert_eq!(code, "Unknown"),
        other => panic!("expected service error, got {:?}", other),
    }
}

#[test]
fn test_error_mapping_to_queue_error() {
    assert!(matches!(
        SqsError::Authentication("denied".to_string()).into_queue_error(),
        QueueError::AuthenticationFailed { .. }
    ));
    assert!(matches!(
        SqsError::Network("timeout".to_string()).into_queue_error(),
        QueueError::ConnectionFailed { .. }
    ));
    assert!(matches!(
        SqsError::QueueNotFound("orders".to_string()).into_queue_error(),
        QueueError::QueueNotFound { .. }
    ));
    assert!(matches!(
        SqsError::InvalidReceipt("handle".to_string()).into_queue_error(),
        QueueError::MessageNotFound { .. }
    ));

    match SqsError::PurgeInProgress("wait".to_string()).into_queue_error() {
        QueueError::Provider { code, .. } => assert_eq!(code, "PurgeQueueInProgress"),
        other => panic!("expected provider error, got {:?}", other),
    }
}

#[test]
fn test_network_errors_are_transient() {
    assert!(SqsError::Network("timeout".to_string())
        .into_queue_error()
        .is_transient());
    assert!(!SqsError::Authentication("denied".to_string())
        .into_queue_error()
        .is_transient());
}

// ============================================================================
// Client Construction and Closed-State Guards
// ============================================================================

#[test]
fn test_api_rejects_empty_region() {
    let result = SqsApi::new("", "id", "key");
    assert!(matches!(result, Err(SqsError::Configuration(_))));
}

#[test]
fn test_api_endpoint_from_region() {
    let api = SqsApi::new("eu-west-1", "id", "key").expect("api");
    assert_eq!(api.endpoint, "https://sqs.eu-west-1.amazonaws.com");
}

#[test]
fn test_counter_names_follow_convention() {
    let queue = SqsMessageQueue::new("orders");
    assert_eq!(queue.counter("sent_messages"), "queue.orders.sent_messages");
    assert_eq!(queue.counter("dead_messages"), "queue.orders.dead_messages");
}

#[test]
fn test_to_envelope_prefers_wire_message_id() {
    let queue = SqsMessageQueue::new("orders");
    let envelope = queue.to_envelope(SqsMessage {
        message_id: "provider-id".to_string(),
        receipt_handle: "handle".to_string(),
        body: r#"{"message_id":"wire-id","message":"hello"}"#.to_string(),
    });
    assert_eq!(envelope.message_id.as_deref(), Some("wire-id"));
    assert_eq!(envelope.receipt.as_ref().map(ReceiptHandle::as_str), Some("handle"));
}

#[test]
fn test_to_envelope_raw_body_falls_back_to_provider_id() {
    let queue = SqsMessageQueue::new("orders");
    let envelope = queue.to_envelope(SqsMessage {
        message_id: "provider-id".to_string(),
        receipt_handle: "handle".to_string(),
        body: "plain text".to_string(),
    });
    assert_eq!(envelope.message_id.as_deref(), Some("provider-id"));
    assert_eq!(envelope.message.as_deref(), Some("plain text"));
}

#[tokio::test]
async fn test_operations_fail_when_not_opened() {
    let queue = SqsMessageQueue::new("orders");
    assert!(!queue.is_open().await);

    let mut envelope = MessageEnvelope::new(None, None, "{}");
    assert!(matches!(
        queue.send(None, &mut envelope).await,
        Err(QueueError::NotOpened)
    ));
    assert!(matches!(queue.peek(None).await, Err(QueueError::NotOpened)));
    assert!(matches!(
        queue.receive(None, Duration::seconds(1)).await,
        Err(QueueError::NotOpened)
    ));
    assert!(matches!(queue.clear(None).await, Err(QueueError::NotOpened)));
    assert!(matches!(
        queue.message_count().await,
        Err(QueueError::NotOpened)
    ));
}

#[tokio::test]
async fn test_close_is_idempotent_when_never_opened() {
    let queue = SqsMessageQueue::new("orders");
    queue.close(None).await.expect("close");
    queue.close(None).await.expect("close again");
    assert!(!queue.is_open().await);
}

#[tokio::test]
async fn test_listen_fails_when_not_opened() {
    struct NoopReceiver;

    #[async_trait]
    impl MessageReceiver for NoopReceiver {
        async fn receive_message(
            &self,
            _envelope: &mut MessageEnvelope,
            _queue: &dyn MessageQueue,
        ) -> Result<(), anyhow::Error> {
            Ok(())
        }
    }

    let queue = SqsMessageQueue::new("orders");
    assert!(matches!(
        queue.listen(None, &NoopReceiver).await,
        Err(QueueError::NotOpened)
    ));
}

#[test]
fn test_end_listen_without_active_loop_is_harmless() {
    let queue = SqsMessageQueue::new("orders");
    queue.end_listen(None);
    queue.end_listen(Some("corr-1"));
}

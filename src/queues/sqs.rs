//! AWS SQS queue client over the HTTP query API.
//!
//! Talks to SQS directly with signed HTTP requests instead of the AWS SDK:
//! requests are authenticated with AWS Signature Version 4 and responses are
//! parsed from the query-protocol XML. The request builders and response
//! parsers are plain functions so they can be unit tested without AWS.
//!
//! ## Queue types
//!
//! Standard queues give at-least-once delivery with best-effort ordering.
//! FIFO queues (name ends in `.fifo`) order strictly within a message group;
//! the envelope's `message_type` is used as the group key, so FIFO sends
//! require one. When content-based deduplication is disabled on a FIFO queue,
//! the envelope's `message_id` is sent as the explicit deduplication key; when
//! it is enabled, no key is sent.
//!
//! ## Leases
//!
//! `receive` hides the message for a 60 second visibility timeout. The caller
//! resolves the lease through `complete`, `abandon`, `renew_lock`, or
//! `move_to_dead_letter`, all keyed by the receipt attached to the envelope.

use crate::connect::AwsConnectionResolver;
use crate::counters::{LogCounters, MessageCounters};
use crate::envelope::{MessageEnvelope, ReceiptHandle};
use crate::error::{ConfigurationError, QueueError};
use crate::queue::{MessageQueue, MessageReceiver};
use crate::settings::QueueSettings;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace, warn};

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

/// Default lease duration applied by `receive`
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::milliseconds(60_000);

/// SQS query API version sent with every request
const SQS_API_VERSION: &str = "2012-11-05";

/// Batch size used when draining a queue that rejects purge
const DRAIN_BATCH_SIZE: u32 = 10;

/// Drain stops once a batch smaller than this arrives
const DRAIN_STOP_THRESHOLD: usize = 9;

// ============================================================================
// Error Types
// ============================================================================

/// SQS transport and service errors, mapped onto [`QueueError`] at the
/// client boundary
#[derive(Debug, thiserror::Error)]
pub enum SqsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("SQS service error ({code}): {message}")]
    Service { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Queue already exists: {0}")]
    QueueAlreadyExists(String),

    #[error("Purge already in progress: {0}")]
    PurgeInProgress(String),

    #[error("Attribute name rejected: {0}")]
    InvalidAttributeName(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Response parsing failed: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl SqsError {
    /// Map onto the provider-agnostic error surface
    fn into_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(message) => QueueError::AuthenticationFailed { message },
            Self::Network(message) => QueueError::ConnectionFailed { message },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::InvalidReceipt(receipt) => QueueError::MessageNotFound { receipt },
            Self::Service { code, message } => QueueError::Provider { code, message },
            Self::QueueAlreadyExists(message) => QueueError::Provider {
                code: "QueueAlreadyExists".to_string(),
                message,
            },
            Self::PurgeInProgress(message) => QueueError::Provider {
                code: "PurgeQueueInProgress".to_string(),
                message,
            },
            Self::InvalidAttributeName(message) => QueueError::Provider {
                code: "InvalidAttributeName".to_string(),
                message,
            },
            Self::Parse(message) => QueueError::Provider {
                code: "MalformedResponse".to_string(),
                message,
            },
            Self::Configuration(message) => {
                QueueError::Configuration(ConfigurationError::Invalid { message })
            }
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 request signer.
///
/// Produces the `Authorization`, `x-amz-date`, and `host` headers for a
/// request: canonical request, string to sign, derived signing key, final
/// signature, in the order the SigV4 process defines them.
#[derive(Clone)]
struct RequestSigner {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl RequestSigner {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a request, returning the headers to attach.
    ///
    /// Query parameters must iterate in canonical (sorted) order, which the
    /// `BTreeMap` guarantees.
    fn sign(
        &self,
        method: &str,
        host: &str,
        path: &str,
        query_params: &BTreeMap<String, String>,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_query_string = canonical_query(query_params);
        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";
        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query_string, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.signature(&string_to_sign, &date_stamp);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), authorization);
        headers.insert("x-amz-date".to_string(), amz_date);
        headers.insert("host".to_string(), host.to_string());
        headers
    }

    /// Derive the signing key through the four-level HMAC chain and sign
    fn signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// SQS Query API Client
// ============================================================================

/// Raw message as returned by the ReceiveMessage action
#[derive(Debug, Clone, PartialEq, Eq)]
struct SqsMessage {
    message_id: String,
    receipt_handle: String,
    body: String,
}

/// Low-level client for the SQS query protocol: one action per method,
/// signed requests, XML responses.
struct SqsApi {
    http_client: HttpClient,
    signer: RequestSigner,
    endpoint: String,
}

impl SqsApi {
    fn new(region: &str, access_id: &str, access_key: &str) -> Result<Self, SqsError> {
        if region.is_empty() {
            return Err(SqsError::Configuration(
                "Region cannot be empty".to_string(),
            ));
        }

        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SqsError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer: RequestSigner::new(
                access_id.to_string(),
                access_key.to_string(),
                region.to_string(),
            ),
            endpoint: format!("https://sqs.{}.amazonaws.com", region),
        })
    }

    /// Issue one signed query-API request and return the response body
    async fn request(&self, params: BTreeMap<String, String>) -> Result<String, SqsError> {
        let host = self
            .endpoint
            .strip_prefix("https://")
            .unwrap_or(&self.endpoint);
        let timestamp = Utc::now();
        let headers = self
            .signer
            .sign("POST", host, "/", &params, "", &timestamp);

        let url = format!("{}/?{}", self.endpoint, canonical_query(&params));

        let mut request = self.http_client.post(&url);
        for (key, value) in headers {
            request = request.header(&key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SqsError::Network(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                SqsError::Network(format!("Connection failed: {}", e))
            } else {
                SqsError::Network(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| SqsError::Network(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }

    fn base_params(action: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), action.to_string());
        params.insert("Version".to_string(), SQS_API_VERSION.to_string());
        params
    }

    /// CreateQueue; the caller decides how to treat `QueueAlreadyExists`
    async fn create_queue(&self, queue_name: &str, fifo: bool) -> Result<(), SqsError> {
        let mut params = Self::base_params("CreateQueue");
        params.insert("QueueName".to_string(), queue_name.to_string());
        if fifo {
            params.insert("Attribute.1.Name".to_string(), "FifoQueue".to_string());
            params.insert("Attribute.1.Value".to_string(), "true".to_string());
        }
        self.request(params).await.map(|_| ())
    }

    async fn get_queue_url(&self, queue_name: &str) -> Result<String, SqsError> {
        let mut params = Self::base_params("GetQueueUrl");
        params.insert("QueueName".to_string(), queue_name.to_string());
        let response = self.request(params).await?;
        parse_queue_url_response(&response)
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[&str],
    ) -> Result<BTreeMap<String, String>, SqsError> {
        let mut params = Self::base_params("GetQueueAttributes");
        params.insert("QueueUrl".to_string(), queue_url.to_string());
        for (index, name) in attribute_names.iter().enumerate() {
            params.insert(format!("AttributeName.{}", index + 1), name.to_string());
        }
        let response = self.request(params).await?;
        Ok(parse_attributes_response(&response))
    }

    /// SendMessage, returning the provider-assigned message id
    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        group_id: Option<&str>,
        deduplication_id: Option<&str>,
    ) -> Result<String, SqsError> {
        let params = send_message_params(queue_url, body, group_id, deduplication_id);
        let response = self.request(params).await?;
        parse_send_message_response(&response)
    }

    /// ReceiveMessage with explicit wait and visibility timeouts.
    ///
    /// `visibility_seconds` of zero is the non-destructive peek mode: the
    /// messages stay immediately visible to other consumers.
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
        wait_seconds: i64,
        visibility_seconds: i64,
    ) -> Result<Vec<SqsMessage>, SqsError> {
        let mut params = Self::base_params("ReceiveMessage");
        params.insert("QueueUrl".to_string(), queue_url.to_string());
        params.insert(
            "MaxNumberOfMessages".to_string(),
            max_messages.clamp(1, 10).to_string(),
        );
        params.insert(
            "WaitTimeSeconds".to_string(),
            wait_seconds.clamp(0, 20).to_string(),
        );
        params.insert(
            "VisibilityTimeout".to_string(),
            visibility_seconds.clamp(0, 43_200).to_string(),
        );
        let response = self.request(params).await?;
        parse_receive_message_response(&response)
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_seconds: i64,
    ) -> Result<(), SqsError> {
        let mut params = Self::base_params("ChangeMessageVisibility");
        params.insert("QueueUrl".to_string(), queue_url.to_string());
        params.insert("ReceiptHandle".to_string(), receipt_handle.to_string());
        params.insert(
            "VisibilityTimeout".to_string(),
            visibility_seconds.clamp(0, 43_200).to_string(),
        );
        self.request(params).await.map(|_| ())
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), SqsError> {
        let mut params = Self::base_params("DeleteMessage");
        params.insert("QueueUrl".to_string(), queue_url.to_string());
        params.insert("ReceiptHandle".to_string(), receipt_handle.to_string());
        self.request(params).await.map(|_| ())
    }

    async fn purge_queue(&self, queue_url: &str) -> Result<(), SqsError> {
        let mut params = Self::base_params("PurgeQueue");
        params.insert("QueueUrl".to_string(), queue_url.to_string());
        self.request(params).await.map(|_| ())
    }
}

impl fmt::Debug for SqsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsApi")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

// ============================================================================
// Request Builders and Response Parsers
// ============================================================================

/// Build SendMessage parameters. FIFO group and deduplication keys are
/// included only when supplied by the caller.
fn send_message_params(
    queue_url: &str,
    body: &str,
    group_id: Option<&str>,
    deduplication_id: Option<&str>,
) -> BTreeMap<String, String> {
    let mut params = SqsApi::base_params("SendMessage");
    params.insert("QueueUrl".to_string(), queue_url.to_string());
    params.insert("MessageBody".to_string(), body.to_string());
    if let Some(group_id) = group_id {
        params.insert("MessageGroupId".to_string(), group_id.to_string());
    }
    if let Some(deduplication_id) = deduplication_id {
        params.insert(
            "MessageDeduplicationId".to_string(),
            deduplication_id.to_string(),
        );
    }
    params
}

fn parse_queue_url_response(xml: &str) -> Result<String, SqsError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_queue_url = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"QueueUrl" => {
                in_queue_url = true;
            }
            Ok(Event::Text(e)) if in_queue_url => {
                return e
                    .unescape()
                    .map(|s| s.into_owned())
                    .map_err(|e| SqsError::Parse(format!("Failed to parse XML: {}", e)));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SqsError::Parse(format!("XML parsing error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Err(SqsError::Parse(
        "QueueUrl not found in response".to_string(),
    ))
}

fn parse_send_message_response(xml: &str) -> Result<String, SqsError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_message_id = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"MessageId" => {
                in_message_id = true;
            }
            Ok(Event::Text(e)) if in_message_id => {
                return e
                    .unescape()
                    .map(|s| s.into_owned())
                    .map_err(|e| SqsError::Parse(format!("Failed to parse XML: {}", e)));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SqsError::Parse(format!("XML parsing error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Err(SqsError::Parse(
        "MessageId not found in response".to_string(),
    ))
}

fn parse_receive_message_response(xml: &str) -> Result<Vec<SqsMessage>, SqsError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut messages = Vec::new();
    let mut in_message = false;
    let mut in_message_id = false;
    let mut in_receipt_handle = false;
    let mut in_body = false;

    let mut current_message_id: Option<String> = None;
    let mut current_receipt_handle: Option<String> = None;
    let mut current_body: Option<String> = None;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Message" => {
                    in_message = true;
                    current_message_id = None;
                    current_receipt_handle = None;
                    current_body = None;
                }
                b"MessageId" if in_message => in_message_id = true,
                b"ReceiptHandle" if in_message => in_receipt_handle = true,
                b"Body" if in_message => in_body = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().ok().map(|s| s.into_owned());
                if in_message_id {
                    current_message_id = text;
                    in_message_id = false;
                } else if in_receipt_handle {
                    current_receipt_handle = text;
                    in_receipt_handle = false;
                } else if in_body {
                    current_body = text;
                    in_body = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Message" => {
                in_message = false;
                if let (Some(message_id), Some(receipt_handle), Some(body)) = (
                    current_message_id.take(),
                    current_receipt_handle.take(),
                    current_body.take(),
                ) {
                    messages.push(SqsMessage {
                        message_id,
                        receipt_handle,
                        body,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SqsError::Parse(format!("XML parsing error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

fn parse_attributes_response(xml: &str) -> BTreeMap<String, String> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut attributes = BTreeMap::new();
    let mut in_name = false;
    let mut in_value = false;
    let mut current_name: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Name" => in_name = true,
                b"Value" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().ok().map(|s| s.into_owned());
                if in_name {
                    current_name = text;
                    in_name = false;
                } else if in_value {
                    if let (Some(name), Some(value)) = (current_name.take(), text) {
                        attributes.insert(name, value);
                    }
                    in_value = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    attributes
}

fn parse_error_response(xml: &str, status_code: u16) -> SqsError {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let code = error_code.unwrap_or_else(|| "Unknown".to_string());
    let message = error_message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "QueueAlreadyExists" | "QueueNameExists" => SqsError::QueueAlreadyExists(message),
        "AWS.SimpleQueueService.PurgeQueueInProgress" | "PurgeQueueInProgress" => {
            SqsError::PurgeInProgress(message)
        }
        "InvalidAttributeName" => SqsError::InvalidAttributeName(message),
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            SqsError::QueueNotFound(message)
        }
        "InvalidClientTokenId" | "UnrecognizedClientException" | "SignatureDoesNotMatch" => {
            SqsError::Authentication(format!("{}: {}", code, message))
        }
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => SqsError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            SqsError::Authentication(format!("{}: {}", code, message))
        }
        _ => SqsError::Service { code, message },
    }
}

// ============================================================================
// SQS Message Queue
// ============================================================================

/// Open-state data, built during `open` and immutable until `close`
#[derive(Debug)]
struct OpenState {
    api: SqsApi,
    queue_url: String,
    dead_queue_url: Option<String>,
    fifo: bool,
    content_deduplication: bool,
    content_deduplication_dlq: bool,
}

/// AWS SQS implementation of [`MessageQueue`].
///
/// One instance owns one logical queue and one provider connection. Direct
/// operations are safe to call concurrently with a running listen loop; the
/// listen cancellation signal is the only shared mutable client state.
pub struct SqsMessageQueue {
    name: String,
    settings: QueueSettings,
    interval: std::time::Duration,
    counters: Arc<dyn MessageCounters>,
    state: RwLock<Option<OpenState>>,
    cancel: Mutex<Arc<AtomicBool>>,
}

impl SqsMessageQueue {
    /// Create a client with default settings; `open` will then derive the
    /// target queue from the client name
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, QueueSettings::default())
    }

    /// Create a client configured from settings
    pub fn with_settings(name: impl Into<String>, settings: QueueSettings) -> Self {
        let interval = std::time::Duration::from_millis(settings.options.interval);
        Self {
            name: name.into(),
            settings,
            interval,
            counters: Arc::new(LogCounters),
            state: RwLock::new(None),
            cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Replace the telemetry hook
    pub fn with_counters(mut self, counters: Arc<dyn MessageCounters>) -> Self {
        self.counters = counters;
        self
    }

    fn counter(&self, event: &str) -> String {
        format!("queue.{}.{}", self.name, event)
    }

    fn to_envelope(&self, raw: SqsMessage) -> MessageEnvelope {
        let mut envelope = MessageEnvelope::from_provider_body(&raw.body);
        // Raw payloads carry no id of their own; fall back to the provider's
        if envelope.message_id.is_none() {
            envelope.message_id = Some(raw.message_id);
        }
        envelope.receipt = Some(ReceiptHandle::new(raw.receipt_handle));
        envelope
    }

    /// FIFO send keys for a target queue: the grouping key is the envelope's
    /// `message_type`; an explicit deduplication key (the `message_id`) is
    /// only produced when content-based deduplication is off for that queue,
    /// never redundantly alongside it.
    ///
    /// The provider rejects empty group ids, so a FIFO send without a
    /// `message_type` fails here instead of on the wire.
    fn fifo_keys(
        envelope: &MessageEnvelope,
        fifo: bool,
        content_deduplication: bool,
    ) -> Result<(Option<String>, Option<String>), QueueError> {
        if !fifo {
            return Ok((None, None));
        }
        let group = match envelope.message_type.as_deref() {
            Some(message_type) if !message_type.is_empty() => Some(message_type.to_string()),
            _ => {
                return Err(QueueError::Configuration(ConfigurationError::Invalid {
                    message: "FIFO queues require a message_type to use as the message group id"
                        .to_string(),
                }))
            }
        };
        let deduplication = if content_deduplication {
            None
        } else {
            envelope.message_id.clone()
        };
        Ok((group, deduplication))
    }

    /// Content-based-deduplication attribute for a queue; a rejected
    /// attribute name means the provider predates the attribute and counts
    /// as disabled
    async fn fetch_content_deduplication(api: &SqsApi, queue_url: &str) -> Result<bool, SqsError> {
        match api
            .get_queue_attributes(queue_url, &["ContentBasedDeduplication"])
            .await
        {
            Ok(attributes) => Ok(attributes
                .get("ContentBasedDeduplication")
                .map(|value| value.eq_ignore_ascii_case("true"))
                .unwrap_or(false)),
            Err(SqsError::InvalidAttributeName(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn connection_error(queue: &str, error: SqsError) -> QueueError {
        QueueError::Connection {
            queue: queue.to_string(),
            message: error.to_string(),
        }
    }
}

impl fmt::Debug for SqsMessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsMessageQueue")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl MessageQueue for SqsMessageQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, correlation_id: Option<&str>) -> Result<(), QueueError> {
        let resolver = AwsConnectionResolver::new(self.settings.clone());
        let mut connection = resolver.resolve(correlation_id)?;

        connection.set_service("sqs");

        // Queue name: explicit resource, then the `queue` setting, then the
        // client's own name
        let queue_name = connection
            .resource
            .clone()
            .or_else(|| self.settings.connection.queue.clone())
            .unwrap_or_else(|| self.name.clone());
        connection.set_resource(&queue_name);
        let dead_queue_name = self.settings.connection.dead_queue.clone();

        let fifo = queue_name.to_ascii_lowercase().ends_with(".fifo");

        connection.validate()?;

        info!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            arn = %connection.arn(),
            "Connecting queue"
        );

        let region = connection.region.clone().ok_or(ConfigurationError::NoRegion)?;
        let access_id = connection
            .access_id
            .clone()
            .ok_or(ConfigurationError::NoAccessId)?;
        let access_key = connection
            .access_key
            .clone()
            .ok_or(ConfigurationError::NoAccessKey)?;

        let api = SqsApi::new(&region, &access_id, &access_key)
            .map_err(|e| Self::connection_error(&queue_name, e))?;

        // Create the queue if it does not exist yet; an existing queue is
        // success, not an error
        match api.create_queue(&queue_name, fifo).await {
            Ok(()) | Err(SqsError::QueueAlreadyExists(_)) => {}
            Err(e) => return Err(Self::connection_error(&queue_name, e)),
        }

        if let Some(ref dead_queue_name) = dead_queue_name {
            match api.create_queue(dead_queue_name, fifo).await {
                Ok(()) | Err(SqsError::QueueAlreadyExists(_)) => {}
                Err(e) => return Err(Self::connection_error(dead_queue_name, e)),
            }
        }

        let queue_url = api
            .get_queue_url(&queue_name)
            .await
            .map_err(|e| Self::connection_error(&queue_name, e))?;

        let dead_queue_url = match dead_queue_name {
            Some(ref dead_queue_name) => Some(
                api.get_queue_url(dead_queue_name)
                    .await
                    .map_err(|e| Self::connection_error(dead_queue_name, e))?,
            ),
            None => None,
        };

        // Deduplication policy is per queue: the dead-letter queue's flag is
        // computed independently of the primary's
        let mut content_deduplication = false;
        let mut content_deduplication_dlq = false;
        if fifo {
            content_deduplication = Self::fetch_content_deduplication(&api, &queue_url)
                .await
                .map_err(|e| Self::connection_error(&queue_name, e))?;
            if let Some(ref dead_queue_url) = dead_queue_url {
                content_deduplication_dlq =
                    Self::fetch_content_deduplication(&api, dead_queue_url)
                        .await
                        .map_err(|e| Self::connection_error(&queue_name, e))?;
            }
        }

        let mut state = self.state.write().await;
        *state = Some(OpenState {
            api,
            queue_url,
            dead_queue_url,
            fifo,
            content_deduplication,
            content_deduplication_dlq,
        });

        debug!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            fifo,
            "Opened queue"
        );

        Ok(())
    }

    async fn close(&self, correlation_id: Option<&str>) -> Result<(), QueueError> {
        self.end_listen(correlation_id);

        let mut state = self.state.write().await;
        *state = None;

        trace!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            "Closed queue"
        );
        Ok(())
    }

    async fn is_open(&self) -> bool {
        self.state.read().await.is_some()
    }

    async fn send(
        &self,
        correlation_id: Option<&str>,
        envelope: &mut MessageEnvelope,
    ) -> Result<(), QueueError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(QueueError::NotOpened)?;

        envelope.sent_time = Some(Utc::now());
        let body = envelope.to_json()?;

        let (group_id, deduplication_id) =
            Self::fifo_keys(envelope, state.fifo, state.content_deduplication)?;

        let message_id = state
            .api
            .send_message(
                &state.queue_url,
                &body,
                group_id.as_deref(),
                deduplication_id.as_deref(),
            )
            .await
            .map_err(SqsError::into_queue_error)?;
        envelope.message_id = Some(message_id);

        self.counters.increment_one(&self.counter("sent_messages"));
        debug!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            envelope = %envelope,
            "Sent message"
        );
        Ok(())
    }

    async fn peek(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        let messages = self.peek_batch(correlation_id, 1).await?;
        Ok(messages.into_iter().next())
    }

    async fn peek_batch(
        &self,
        correlation_id: Option<&str>,
        count: u32,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(QueueError::NotOpened)?;

        // Zero visibility timeout: the messages stay visible to everyone,
        // this is inspection, not consumption
        let raw = state
            .api
            .receive_messages(&state.queue_url, count, 0, 0)
            .await
            .map_err(SqsError::into_queue_error)?;

        let messages: Vec<MessageEnvelope> =
            raw.into_iter().map(|m| self.to_envelope(m)).collect();

        trace!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            count = messages.len(),
            "Peeked messages"
        );
        Ok(messages)
    }

    async fn receive(
        &self,
        correlation_id: Option<&str>,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(QueueError::NotOpened)?;

        let raw = state
            .api
            .receive_messages(
                &state.queue_url,
                1,
                wait_timeout.num_seconds(),
                DEFAULT_VISIBILITY_TIMEOUT.num_seconds(),
            )
            .await
            .map_err(SqsError::into_queue_error)?;

        let envelope = raw.into_iter().next().map(|m| self.to_envelope(m));

        if let Some(ref envelope) = envelope {
            self.counters
                .increment_one(&self.counter("received_messages"));
            debug!(
                correlation_id = correlation_id.unwrap_or(""),
                queue = %self.name,
                envelope = %envelope,
                "Received message"
            );
        }
        Ok(envelope)
    }

    async fn renew_lock(
        &self,
        envelope: &mut MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(QueueError::NotOpened)?;

        if let Some(ref receipt) = envelope.receipt {
            state
                .api
                .change_visibility(&state.queue_url, receipt.as_str(), lock_timeout.num_seconds())
                .await
                .map_err(SqsError::into_queue_error)?;

            trace!(queue = %self.name, envelope = %envelope, "Renewed message lock");
        }
        Ok(())
    }

    async fn abandon(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(QueueError::NotOpened)?;

        if let Some(receipt) = envelope.receipt.take() {
            // Zero visibility makes the message immediately redeliverable
            state
                .api
                .change_visibility(&state.queue_url, receipt.as_str(), 0)
                .await
                .map_err(SqsError::into_queue_error)?;

            trace!(queue = %self.name, envelope = %envelope, "Abandoned message");
        }
        Ok(())
    }

    async fn complete(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(QueueError::NotOpened)?;

        if let Some(receipt) = envelope.receipt.take() {
            state
                .api
                .delete_message(&state.queue_url, receipt.as_str())
                .await
                .map_err(SqsError::into_queue_error)?;

            trace!(queue = %self.name, envelope = %envelope, "Completed message");
        }
        Ok(())
    }

    async fn move_to_dead_letter(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(QueueError::NotOpened)?;

        if envelope.receipt.is_none() {
            return Ok(());
        }

        // Keep the receipt until the dead-letter copy is on its way; a failed
        // re-send leaves the lease intact for another attempt
        if let Some(ref dead_queue_url) = state.dead_queue_url {
            let body = envelope.to_json()?;
            let (group_id, deduplication_id) =
                Self::fifo_keys(envelope, state.fifo, state.content_deduplication_dlq)?;
            state
                .api
                .send_message(
                    dead_queue_url,
                    &body,
                    group_id.as_deref(),
                    deduplication_id.as_deref(),
                )
                .await
                .map_err(SqsError::into_queue_error)?;
        } else {
            warn!(
                queue = %self.name,
                envelope = %envelope,
                "No dead letter queue is defined. The message is discarded."
            );
        }

        if let Some(receipt) = envelope.receipt.take() {
            state
                .api
                .delete_message(&state.queue_url, receipt.as_str())
                .await
                .map_err(SqsError::into_queue_error)?;
        }

        self.counters.increment_one(&self.counter("dead_messages"));
        trace!(queue = %self.name, envelope = %envelope, "Moved message to dead letter queue");
        Ok(())
    }

    async fn listen(
        &self,
        correlation_id: Option<&str>,
        receiver: &dyn MessageReceiver,
    ) -> Result<(), QueueError> {
        if !self.is_open().await {
            return Err(QueueError::NotOpened);
        }

        debug!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            "Started listening for messages"
        );

        // Fresh signal per listen call so a cancelled loop can be restarted
        let cancel = Arc::new(AtomicBool::new(false));
        *self.cancel.lock().expect("cancel lock poisoned") = cancel.clone();

        while !cancel.load(Ordering::SeqCst) {
            let raw = {
                let guard = self.state.read().await;
                let Some(state) = guard.as_ref() else {
                    break;
                };
                state
                    .api
                    .receive_messages(
                        &state.queue_url,
                        1,
                        0,
                        DEFAULT_VISIBILITY_TIMEOUT.num_seconds(),
                    )
                    .await
                    .map_err(SqsError::into_queue_error)?
                    .into_iter()
                    .next()
            };

            match raw {
                Some(raw) if !cancel.load(Ordering::SeqCst) => {
                    let mut envelope = self.to_envelope(raw);

                    self.counters
                        .increment_one(&self.counter("received_messages"));
                    debug!(
                        correlation_id = correlation_id.unwrap_or(""),
                        queue = %self.name,
                        envelope = %envelope,
                        "Received message"
                    );

                    // A failing message must never stop the loop; its lease
                    // simply runs out unless the receiver resolved it
                    if let Err(callback_error) = receiver.receive_message(&mut envelope, self).await
                    {
                        error!(
                            correlation_id = correlation_id.unwrap_or(""),
                            queue = %self.name,
                            error = %callback_error,
                            "Failed to process the message"
                        );
                    }
                }
                Some(_) => {}
                None => tokio::time::sleep(self.interval).await,
            }
        }

        Ok(())
    }

    fn end_listen(&self, correlation_id: Option<&str>) {
        self.cancel
            .lock()
            .expect("cancel lock poisoned")
            .store(true, Ordering::SeqCst);
        trace!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            "Requested end of listening"
        );
    }

    async fn clear(&self, correlation_id: Option<&str>) -> Result<(), QueueError> {
        let purge_result = {
            let guard = self.state.read().await;
            let state = guard.as_ref().ok_or(QueueError::NotOpened)?;
            state.api.purge_queue(&state.queue_url).await
        };

        match purge_result {
            Ok(()) => {}
            Err(SqsError::PurgeInProgress(_)) => {
                // The provider allows one purge per minute; drain by hand
                loop {
                    let mut messages = self.peek_batch(correlation_id, DRAIN_BATCH_SIZE).await?;
                    let count = messages.len();
                    for message in &mut messages {
                        self.complete(message).await?;
                    }
                    if count < DRAIN_STOP_THRESHOLD {
                        break;
                    }
                }
            }
            Err(e) => return Err(e.into_queue_error()),
        }

        trace!(
            correlation_id = correlation_id.unwrap_or(""),
            queue = %self.name,
            "Cleared queue"
        );
        Ok(())
    }

    async fn message_count(&self) -> Result<u64, QueueError> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(QueueError::NotOpened)?;

        let attributes = state
            .api
            .get_queue_attributes(&state.queue_url, &["ApproximateNumberOfMessages"])
            .await
            .map_err(SqsError::into_queue_error)?;

        Ok(attributes
            .get("ApproximateNumberOfMessages")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0))
    }
}

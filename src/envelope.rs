//! Message envelope and wire codec.
//!
//! The envelope is the logical unit exchanged with the queue, distinct from
//! the provider's raw transport message. On the wire it is a JSON object with
//! `message_id`, `correlation_id`, `message_type`, `message` and `sent_time`
//! fields. Decoding is tolerant: a payload that is not a well-formed envelope
//! degrades to a raw-payload fallback instead of failing the receive path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Opaque provider receipt token attached to an in-flight envelope.
///
/// Present iff the envelope was obtained via peek/receive from the client
/// that holds the lease and has not yet been completed, abandoned, or moved
/// to the dead-letter queue. The token is a back-reference into the provider,
/// valid only for the lifetime of the lease; resolving the message clears it,
/// which prevents double acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Logical message exchanged between client and queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Provider-assigned identifier, set on send acknowledgement or receive.
    /// Client-generated until then so FIFO deduplication has a stable key.
    #[serde(default)]
    pub message_id: Option<String>,

    /// Caller-supplied tracing token, opaque to the queue
    #[serde(default)]
    pub correlation_id: Option<String>,

    /// Caller-supplied classification, used as the FIFO grouping key
    #[serde(default)]
    pub message_type: Option<String>,

    /// Client-side send timestamp, not provider authoritative
    #[serde(default)]
    pub sent_time: Option<DateTime<Utc>>,

    /// Serialized payload content
    #[serde(default)]
    pub message: Option<String>,

    /// Provider receipt for the in-flight lease; never serialized
    #[serde(skip)]
    pub receipt: Option<ReceiptHandle>,
}

impl MessageEnvelope {
    /// Create an envelope with a generated message id
    pub fn new(
        correlation_id: Option<String>,
        message_type: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message_id: Some(uuid::Uuid::new_v4().to_string()),
            correlation_id,
            message_type,
            sent_time: None,
            message: Some(message.into()),
            receipt: None,
        }
    }

    /// Encode the envelope into its JSON wire form
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a provider message body into an envelope.
    ///
    /// Malformed bodies yield a fallback envelope whose payload is the raw
    /// input and whose structured fields are empty; a poison message must
    /// never block the consumption loop.
    pub fn from_provider_body(body: &str) -> Self {
        match serde_json::from_str::<MessageEnvelope>(body) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%error, body, "Cannot deserialize message, keeping raw payload");
                Self {
                    message: Some(body.to_string()),
                    ..Default::default()
                }
            }
        }
    }
}

impl std::fmt::Display for MessageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.message_id.as_deref().unwrap_or("---"),
            self.correlation_id.as_deref().unwrap_or("---"),
            self.message_type.as_deref().unwrap_or("---"),
        )
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;

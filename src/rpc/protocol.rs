// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! RPC wire protocol.
//!
//! Every frame is one JSON envelope carried in a WebSocket text message.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Envelope
// ============================================================================

/// Generate a unique correlation ID.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Kind of envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Error,
    /// Any tag this client does not understand.
    #[serde(other)]
    Unknown,
}

/// A single RPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation ID shared by a request and its response.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Operation name; set on requests.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create a request envelope with a fresh correlation ID.
    pub fn request(action: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: generate_request_id(),
            kind: MessageKind::Request,
            action: action.into(),
            payload,
        }
    }

    /// Create a success response to `id`.
    pub fn response(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind: MessageKind::Response,
            action: String::new(),
            payload,
        }
    }

    /// Create an error response to `id`.
    pub fn error(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        let body = ErrorBody {
            code: code.into(),
            message: message.into(),
        };
        Self {
            id: id.into(),
            kind: MessageKind::Error,
            action: String::new(),
            payload: serde_json::to_value(body).unwrap_or_default(),
        }
    }

    /// Whether this envelope answers a request.
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, MessageKind::Response | MessageKind::Error)
    }

    /// Decode the payload of an error envelope.
    ///
    /// Returns `None` for other kinds. A malformed body still yields an
    /// error with the raw payload as its message.
    pub fn error_body(&self) -> Option<ErrorBody> {
        if self.kind != MessageKind::Error {
            return None;
        }
        Some(
            serde_json::from_value(self.payload.clone()).unwrap_or_else(|_| ErrorBody {
                code: "unknown".to_string(),
                message: self.payload.to_string(),
            }),
        )
    }
}

/// Payload of an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

// ============================================================================
// Serialization
// ============================================================================

/// Encode an envelope as a JSON string.
pub fn encode(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Decode an envelope from a JSON string.
pub fn decode(json: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(json.trim())
}

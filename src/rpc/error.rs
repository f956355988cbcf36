// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! RPC error types.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the parent over RPC.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The client has no live connection.
    #[error("Not connected")]
    NotConnected,

    /// Dialing the parent failed.
    #[error("Failed to connect to {url}: {message}")]
    ConnectFailed { url: String, message: String },

    /// A write failed, or the connection was lost with the request in flight.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response arrived within the deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// The peer answered with an error envelope.
    #[error("Remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    /// A response payload did not match the expected shape.
    #[error("Failed to decode payload: {0}")]
    Decode(String),

    /// A request payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RpcError {
    /// Check if this error means the connection is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Transport(_))
    }
}

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

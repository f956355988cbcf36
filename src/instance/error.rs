// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for instance management.

use std::io;
use thiserror::Error;

/// Errors that can occur while creating, querying, or stopping instances.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The live instance count is already at the configured ceiling.
    #[error("Maximum instances reached: {0}")]
    CapacityExceeded(usize),

    /// An instance with the requested identifier already exists.
    #[error("Instance already exists: {0}")]
    AlreadyExists(String),

    /// Every port in the allocator's range is reserved.
    #[error("No free port in range {base}-{max}")]
    PortsExhausted { base: u16, max: u16 },

    /// The port range is empty or inverted.
    #[error("Invalid port range: {base}-{max}")]
    InvalidPortRange { base: u16, max: u16 },

    /// No instance with this identifier is live.
    #[error("Instance not found: {0}")]
    NotFound(String),

    /// The create request could not be resolved into a runnable command.
    #[error("Invalid instance request: {0}")]
    InvalidRequest(String),

    /// The process supervisor could not be built or started.
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    /// The instance listener failed to bind or did not report readiness.
    #[error("Listener failed on {addr}: {message}")]
    ListenerFailed { addr: String, message: String },

    /// The instance listener did not terminate cleanly.
    #[error("Listener shutdown failed: {0}")]
    ListenerShutdown(String),
}

impl InstanceError {
    /// Create a listener error from an IO error.
    pub fn listener(addr: impl Into<String>, err: io::Error) -> Self {
        Self::ListenerFailed {
            addr: addr.into(),
            message: err.to_string(),
        }
    }

    /// Check if this error was caused by a resource limit rather than bad input.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::CapacityExceeded(_) | Self::PortsExhausted { .. })
    }
}

/// Errors reported by a process supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("Failed to stop process: {0}")]
    Stop(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<SupervisorError> for InstanceError {
    fn from(err: SupervisorError) -> Self {
        InstanceError::SpawnFailed(err.to_string())
    }
}

/// Result type for instance operations.
pub type InstanceResult<T> = Result<T, InstanceError>;

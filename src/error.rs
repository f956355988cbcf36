// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for berth.
//!
//! Each subsystem has its own `thiserror` enum; this module holds the
//! configuration errors and re-exports the rest. Binaries propagate with
//! `anyhow`.

use thiserror::Error;

pub use crate::instance::error::{InstanceError, SupervisorError};
pub use crate::rpc::error::RpcError;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

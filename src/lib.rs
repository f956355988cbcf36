// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! berth - a control plane for agent instances.
//!
//! berth runs agent processes side by side, each fronted by a network
//! listener on its own port, and gives those agents a way to call back into
//! the process that launched them.
//!
//! # Architecture
//!
//! - [`instance`] - Port allocation, instance lifecycle, process and listener handles
//! - [`rpc`] - Correlated request/response client over a WebSocket connection
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types and result aliases
//!
//! # Example
//!
//! ```rust,no_run
//! use berth::config::{load_config, CliOptions};
//! use berth::instance::InstanceManager;
//!
//! # async fn example() -> berth::Result<()> {
//! let config = load_config(std::path::Path::new("."), CliOptions::default())?;
//! let manager = InstanceManager::from_config(config.manager.clone())?;
//!
//! for template in &config.instances {
//!     manager.create(template.to_request()).await?;
//! }
//! manager.shutdown_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod instance;
pub mod rpc;
pub mod telemetry;

pub use error::{ConfigError, InstanceError, Result, RpcError, SupervisorError};
pub use instance::{CreateRequest, CreatedInstance, InstanceManager, ManagerConfig, PortAllocator};
pub use rpc::{Envelope, RpcClient, RpcConfig};

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent instance management.
//!
//! An instance is one agent process plus the network listener that fronts it
//! on a dedicated port. The [`InstanceManager`] enforces a capacity ceiling,
//! hands out ports from a [`PortAllocator`], and guarantees that a stopped
//! instance gives its port back even when teardown fails part way.
//!
//! # Example
//!
//! ```rust,no_run
//! use berth::instance::{CreateRequest, InstanceManager, ManagerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = InstanceManager::from_config(ManagerConfig::default())?;
//!
//! let created = manager
//!     .create(CreateRequest::new().with_workspace("/srv/project"))
//!     .await?;
//! println!("{} listening on port {}", created.id, created.port);
//!
//! manager.stop(&created.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod error;
pub mod listener;
pub mod manager;
pub mod ports;
pub mod supervisor;
pub mod types;

pub use error::{InstanceError, InstanceResult, SupervisorError};
pub use listener::{unavailable_router, HandlerFactory, ListenerHandle};
pub use manager::{Instance, InstanceManager};
pub use ports::PortAllocator;
pub use supervisor::{
    CommandSupervisor, CommandSupervisorFactory, ProcessSpec, ProcessSupervisor, SupervisorFactory,
};
pub use types::{
    AgentProtocol, CreateRequest, CreatedInstance, InstanceConfig, InstanceInfo, InstanceStatus,
    ManagerConfig,
};

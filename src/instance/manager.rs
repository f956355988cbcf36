// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instance manager.
//!
//! The manager owns the port allocator and every live instance. Creating an
//! instance reserves a port, builds the agent's process supervisor and
//! network handler, and starts the handler's listener in the background.
//! Stopping an instance tears those down on a best-effort basis, but always
//! returns the port and forgets the instance.
//!
//! ```text
//! create ──► PortAllocator::allocate ──► SupervisorFactory::create
//!                                              │
//!                                              ▼
//!                       HandlerFactory::build ──► ListenerHandle::spawn
//!                                                         │
//! stop   ──► supervisor.stop ──► listener.shutdown ──► release port
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, info_span, instrument, warn};
use uuid::Uuid;

use super::env::{build_environment, control_vars};
use super::error::{InstanceError, InstanceResult};
use super::listener::{unavailable_router, HandlerFactory, ListenerHandle};
use super::ports::PortAllocator;
use super::supervisor::{CommandSupervisorFactory, ProcessSpec, ProcessSupervisor, SupervisorFactory};
use super::types::{
    split_command, AgentProtocol, CreateRequest, CreatedInstance, InstanceConfig, InstanceInfo,
    InstanceStatus, ManagerConfig,
};

/// A live agent instance.
///
/// Owned exclusively by the [`InstanceManager`]; it holds no reference back
/// to the manager.
pub struct Instance {
    pub id: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub protocol: AgentProtocol,
    pub program: String,
    pub args: Vec<String>,
    pub workspace: Option<PathBuf>,
    /// Caller-supplied environment overrides.
    pub env: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    supervisor: Arc<dyn ProcessSupervisor>,
    listener: ListenerHandle,
}

impl Instance {
    /// The process supervisor for this instance.
    pub fn supervisor(&self) -> &Arc<dyn ProcessSupervisor> {
        &self.supervisor
    }

    /// Address the instance listener binds.
    pub fn listen_addr(&self) -> &str {
        self.listener.addr()
    }

    /// Whether the listener task has exited (bind failure or server error).
    pub fn listener_finished(&self) -> bool {
        self.listener.is_finished()
    }

    /// Snapshot of the public fields.
    pub async fn info(&self) -> InstanceInfo {
        let mut env_keys: Vec<String> = self.env.keys().cloned().collect();
        env_keys.sort();

        InstanceInfo {
            id: self.id.clone(),
            port: self.port,
            status: self.status,
            protocol: self.protocol,
            command: self.program.clone(),
            args: self.args.clone(),
            workspace: self.workspace.clone(),
            env_keys,
            created_at: self.created_at,
            pid: self.supervisor.pid().await,
        }
    }
}

/// Creates, tracks, and stops agent instances.
pub struct InstanceManager {
    config: ManagerConfig,
    ports: PortAllocator,
    instances: RwLock<HashMap<String, Instance>>,
    supervisors: Arc<dyn SupervisorFactory>,
    handlers: Option<Arc<dyn HandlerFactory>>,
}

impl InstanceManager {
    /// Create a manager around an existing port allocator.
    pub fn new(config: ManagerConfig, ports: PortAllocator) -> Self {
        Self {
            config,
            ports,
            instances: RwLock::new(HashMap::new()),
            supervisors: Arc::new(CommandSupervisorFactory),
            handlers: None,
        }
    }

    /// Create a manager with an allocator over the configured port range.
    pub fn from_config(config: ManagerConfig) -> InstanceResult<Self> {
        let ports = PortAllocator::new(config.base_port, config.max_port)?;
        Ok(Self::new(config, ports))
    }

    /// Use a custom supervisor factory.
    pub fn with_supervisor_factory(mut self, factory: Arc<dyn SupervisorFactory>) -> Self {
        self.supervisors = factory;
        self
    }

    /// Use a handler factory for instance listeners.
    ///
    /// Without one, every instance answers `503 Service Unavailable`.
    pub fn with_handler_factory(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
        self.handlers = Some(factory);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The port allocator owned by this manager.
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Create and start a new instance.
    #[instrument(skip(self, request), fields(id = request.id.as_deref().unwrap_or("-")))]
    pub async fn create(&self, request: CreateRequest) -> InstanceResult<CreatedInstance> {
        let mut instances = self.instances.write().await;

        if instances.len() >= self.config.max_instances {
            return Err(InstanceError::CapacityExceeded(self.config.max_instances));
        }

        let id = match request.id.as_deref() {
            Some(id) if id.trim().is_empty() => {
                return Err(InstanceError::InvalidRequest("empty instance id".to_string()));
            }
            Some(id) if instances.contains_key(id) => {
                return Err(InstanceError::AlreadyExists(id.to_string()));
            }
            Some(id) => id.to_string(),
            None => generate_instance_id(&instances),
        };

        let command_line = request
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.config.default_command);
        let (program, mut args) = split_command(command_line)
            .ok_or_else(|| InstanceError::InvalidRequest("no agent command".to_string()))?;
        let protocol = request.protocol.unwrap_or(self.config.default_protocol);
        if let Some(workspace) = &request.workspace {
            protocol.apply_workspace(&mut args, workspace);
        }

        let port = self.ports.allocate(&id)?;

        let config = InstanceConfig {
            listen_addr: self.config.listen_addr(port),
            id,
            port,
            protocol,
            program,
            args,
            workspace: request.workspace,
            env: request.env,
            auto_start: request.auto_start,
        };

        match self.launch(&config).await {
            Ok((supervisor, listener)) => {
                info!(
                    instance = %config.id,
                    port,
                    protocol = %config.protocol,
                    command = %config.command_line(),
                    "Instance created"
                );
                let created = CreatedInstance {
                    id: config.id.clone(),
                    port,
                };
                instances.insert(
                    config.id.clone(),
                    Instance {
                        id: config.id,
                        port,
                        status: InstanceStatus::Running,
                        protocol: config.protocol,
                        program: config.program,
                        args: config.args,
                        workspace: config.workspace,
                        env: config.env,
                        created_at: Utc::now(),
                        supervisor,
                        listener,
                    },
                );
                Ok(created)
            }
            Err(e) => {
                self.ports.release(port);
                Err(e)
            }
        }
    }

    /// Build the supervisor and listener for a resolved config.
    ///
    /// On error everything this function started has been torn down; the
    /// caller still owns the port.
    async fn launch(
        &self,
        config: &InstanceConfig,
    ) -> InstanceResult<(Arc<dyn ProcessSupervisor>, ListenerHandle)> {
        let prefix = &self.config.internal_env_prefix;
        let control = control_vars(prefix, &config.id, config.port, self.config.rpc_url.as_deref());
        let env = build_environment(std::env::vars_os(), prefix, &control, &config.env);

        let supervisor = self.supervisors.create(ProcessSpec {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.workspace.clone(),
            env,
        })?;

        let span = info_span!("instance", id = %config.id, port = config.port);
        let router = match &self.handlers {
            Some(factory) => factory.build(config, Arc::clone(&supervisor), span.clone()),
            None => {
                debug!(instance = %config.id, "No handler factory configured; serving 503");
                unavailable_router()
            }
        };
        let mut listener = ListenerHandle::spawn(config.listen_addr.clone(), router, span);

        if self.config.wait_for_listener {
            if let Err(e) = listener.wait_ready().await {
                self.teardown(&config.id, supervisor.as_ref(), listener).await;
                return Err(e);
            }
        }

        if config.auto_start {
            if let Err(e) = supervisor.start().await {
                self.teardown(&config.id, supervisor.as_ref(), listener).await;
                return Err(e.into());
            }
        }

        Ok((supervisor, listener))
    }

    /// Best-effort stop of a supervisor and listener. Failures are logged.
    async fn teardown(&self, id: &str, supervisor: &dyn ProcessSupervisor, listener: ListenerHandle) {
        let timeout = self.config.stop_timeout();

        match tokio::time::timeout(timeout, supervisor.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(instance = %id, "Failed to stop agent process: {}", e),
            Err(_) => warn!(instance = %id, "Agent process did not stop within {:?}", timeout),
        }

        if let Err(e) = listener.shutdown(timeout).await {
            warn!(instance = %id, "Failed to stop instance listener: {}", e);
        }
    }

    /// Read access to a live instance.
    ///
    /// The returned guard holds the manager's read lock; drop it before
    /// calling any mutating operation.
    pub async fn get(&self, id: &str) -> Option<RwLockReadGuard<'_, Instance>> {
        let instances = self.instances.read().await;
        RwLockReadGuard::try_map(instances, |map| map.get(id)).ok()
    }

    /// Snapshot of one live instance.
    pub async fn info(&self, id: &str) -> Option<InstanceInfo> {
        let instances = self.instances.read().await;
        match instances.get(id) {
            Some(instance) => Some(instance.info().await),
            None => None,
        }
    }

    /// Snapshot of every live instance, ordered by port.
    pub async fn list(&self) -> Vec<InstanceInfo> {
        let instances = self.instances.read().await;
        let mut infos = Vec::with_capacity(instances.len());
        for instance in instances.values() {
            infos.push(instance.info().await);
        }
        infos.sort_by_key(|info| info.port);
        infos
    }

    /// Number of live instances.
    pub async fn count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Stop an instance and release its port.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: &str) -> InstanceResult<()> {
        let mut instances = self.instances.write().await;
        self.stop_locked(&mut instances, id).await
    }

    async fn stop_locked(
        &self,
        instances: &mut HashMap<String, Instance>,
        id: &str,
    ) -> InstanceResult<()> {
        let instance = instances
            .remove(id)
            .ok_or_else(|| InstanceError::NotFound(id.to_string()))?;

        let Instance {
            port,
            supervisor,
            listener,
            ..
        } = instance;

        self.teardown(id, supervisor.as_ref(), listener).await;
        self.ports.release(port);

        info!(instance = %id, port, "Instance stopped");
        Ok(())
    }

    /// Stop every live instance, one at a time.
    ///
    /// Every instance is attempted; the last error seen is returned.
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self) -> InstanceResult<()> {
        let mut instances = self.instances.write().await;

        let mut ids: Vec<String> = instances.keys().cloned().collect();
        ids.sort();
        info!(count = ids.len(), "Stopping all instances");

        let mut last_error = None;
        for id in ids {
            if let Err(e) = self.stop_locked(&mut instances, &id).await {
                warn!(instance = %id, "Failed to stop instance: {}", e);
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn generate_instance_id(existing: &HashMap<String, Instance>) -> String {
    loop {
        let id = format!("agent-{}", Uuid::new_v4().simple());
        if !existing.contains_key(&id) {
            return id;
        }
    }
}

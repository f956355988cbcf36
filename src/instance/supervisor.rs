// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process supervision seam.
//!
//! The manager only needs to start and stop an agent process; how that is
//! done is behind [`ProcessSupervisor`]. [`CommandSupervisor`] is the default
//! implementation on top of `tokio::process`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::SupervisorError;

/// Everything needed to launch an agent process.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Complete environment; the inherited environment is not added on top.
    pub env: HashMap<String, String>,
}

/// Handle to a supervised agent process.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start the process. Starting a running process is a no-op.
    async fn start(&self) -> Result<(), SupervisorError>;

    /// Stop the process. Stopping a process that is not running is a no-op.
    async fn stop(&self) -> Result<(), SupervisorError>;

    /// OS process ID while running.
    async fn pid(&self) -> Option<u32>;
}

/// Builds supervisor handles for new instances.
pub trait SupervisorFactory: Send + Sync {
    fn create(&self, spec: ProcessSpec) -> Result<Arc<dyn ProcessSupervisor>, SupervisorError>;
}

/// Supervisor that runs the agent as a child process.
pub struct CommandSupervisor {
    spec: ProcessSpec,
    child: Mutex<Option<Child>>,
}

impl CommandSupervisor {
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            child: Mutex::new(None),
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .env_clear()
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl ProcessSupervisor for CommandSupervisor {
    async fn start(&self) -> Result<(), SupervisorError> {
        let mut child = self.child.lock().await;

        if let Some(running) = child.as_mut() {
            if running.try_wait()?.is_none() {
                debug!(program = %self.spec.program, "Process already running");
                return Ok(());
            }
        }

        let spawned = self.command().spawn().map_err(|e| SupervisorError::Spawn {
            command: self.spec.program.clone(),
            message: e.to_string(),
        })?;
        info!(program = %self.spec.program, pid = ?spawned.id(), "Started agent process");
        *child = Some(spawned);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SupervisorError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        if let Some(status) = child.try_wait()? {
            debug!(?status, "Agent process already exited");
            return Ok(());
        }

        let pid = child.id();
        child
            .kill()
            .await
            .map_err(|e| SupervisorError::Stop(e.to_string()))?;
        info!(pid = ?pid, "Stopped agent process");
        Ok(())
    }

    async fn pid(&self) -> Option<u32> {
        let mut child = self.child.lock().await;
        let running = child.as_mut()?;
        match running.try_wait() {
            Ok(None) => running.id(),
            Ok(Some(_)) => None,
            Err(e) => {
                warn!("Failed to poll agent process: {}", e);
                None
            }
        }
    }
}

/// Default factory producing [`CommandSupervisor`] handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSupervisorFactory;

impl SupervisorFactory for CommandSupervisorFactory {
    fn create(&self, spec: ProcessSpec) -> Result<Arc<dyn ProcessSupervisor>, SupervisorError> {
        if spec.program.trim().is_empty() {
            return Err(SupervisorError::Spawn {
                command: spec.program,
                message: "empty command".to_string(),
            });
        }
        Ok(Arc::new(CommandSupervisor::new(spec)))
    }
}

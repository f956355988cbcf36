// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for instance management.
//!
//! Defines manager configuration, create requests, agent protocols, and the
//! public snapshot of a live instance.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Agent Protocol
// ============================================================================

/// Command-line convention expected by an agent executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentProtocol {
    /// Agent Client Protocol: the workspace is the process working directory.
    #[default]
    Acp,
    /// Model Context Protocol server: takes an explicit workspace root flag.
    Mcp,
}

impl AgentProtocol {
    /// All known protocols.
    pub const ALL: &'static [AgentProtocol] = &[AgentProtocol::Acp, AgentProtocol::Mcp];

    /// Flag used to point the agent at its workspace, if the protocol needs one.
    pub fn workspace_flag(self) -> Option<&'static str> {
        match self {
            Self::Acp => None,
            Self::Mcp => Some("--workspace-root"),
        }
    }

    /// Append the workspace flag to `args` unless it is already present.
    pub fn apply_workspace(self, args: &mut Vec<String>, workspace: &Path) {
        let Some(flag) = self.workspace_flag() else {
            return;
        };

        let prefixed = format!("{}=", flag);
        let present = args
            .iter()
            .any(|arg| arg == flag || arg.starts_with(&prefixed));
        if !present {
            args.push(flag.to_string());
            args.push(workspace.to_string_lossy().into_owned());
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acp => "acp",
            Self::Mcp => "mcp",
        }
    }
}

impl fmt::Display for AgentProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown agent protocol: {}", s))
    }
}

// ============================================================================
// Manager Configuration
// ============================================================================

/// Configuration for an [`InstanceManager`](super::InstanceManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerConfig {
    /// Maximum number of live instances.
    pub max_instances: usize,
    /// First port handed out to instances.
    pub base_port: u16,
    /// Last port handed out to instances (inclusive).
    pub max_port: u16,
    /// Agent command line used when a request does not name one.
    pub default_command: String,
    /// Protocol used when a request does not name one.
    pub default_protocol: AgentProtocol,
    /// Host part of each instance's listen address.
    pub listen_host: String,
    /// Inherited environment variables with this prefix are not passed to agents.
    pub internal_env_prefix: String,
    /// Wait for the instance listener to bind before create returns.
    pub wait_for_listener: bool,
    /// Parent RPC endpoint advertised to spawned agents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    /// Upper bound on each best-effort teardown step, in milliseconds.
    pub stop_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_instances: 10,
            base_port: 9000,
            max_port: 9100,
            default_command: "acp-agent".to_string(),
            default_protocol: AgentProtocol::Acp,
            listen_host: "0.0.0.0".to_string(),
            internal_env_prefix: "BERTH_".to_string(),
            wait_for_listener: false,
            rpc_url: None,
            stop_timeout_ms: 5_000,
        }
    }
}

impl ManagerConfig {
    /// Set the maximum number of live instances.
    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = max;
        self
    }

    /// Set the port range.
    pub fn with_port_range(mut self, base_port: u16, max_port: u16) -> Self {
        self.base_port = base_port;
        self.max_port = max_port;
        self
    }

    /// Set the default agent command line.
    pub fn with_default_command(mut self, command: impl Into<String>) -> Self {
        self.default_command = command.into();
        self
    }

    /// Set the listen host.
    pub fn with_listen_host(mut self, host: impl Into<String>) -> Self {
        self.listen_host = host.into();
        self
    }

    /// Wait for listener readiness in create.
    pub fn with_wait_for_listener(mut self, wait: bool) -> Self {
        self.wait_for_listener = wait;
        self
    }

    /// Teardown timeout as a duration.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Listen address for an instance on `port`.
    pub fn listen_addr(&self, port: u16) -> String {
        format!("{}:{}", self.listen_host, port)
    }
}

// ============================================================================
// Create Request
// ============================================================================

/// Request to create a new instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateRequest {
    /// Instance identifier; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Agent command line; the manager default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Agent protocol; the manager default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<AgentProtocol>,
    /// Workspace directory for the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Start the agent process during create.
    pub auto_start: bool,
    /// Environment overrides, applied over the inherited environment.
    pub env: HashMap<String, String>,
}

impl CreateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_protocol(mut self, protocol: AgentProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInstance {
    pub id: String,
    pub port: u16,
}

// ============================================================================
// Instance Configuration and Status
// ============================================================================

/// Lifecycle state of an instance.
///
/// Stopped instances are removed from the manager, so only `Running` is ever
/// observed on a live record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
        }
    }
}

/// Resolved per-instance configuration handed to the handler factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,
    pub port: u16,
    pub listen_addr: String,
    pub protocol: AgentProtocol,
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Caller-supplied overrides only; the full environment lives in the process spec.
    pub env: HashMap<String, String>,
    pub auto_start: bool,
}

impl InstanceConfig {
    /// Full command line as a single string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Public snapshot of a live instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub id: String,
    pub port: u16,
    pub status: InstanceStatus,
    pub protocol: AgentProtocol,
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Names of overridden environment variables (values are not exposed).
    pub env_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Split a command line on whitespace into program and arguments.
pub fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

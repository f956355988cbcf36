// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace and resolved configuration,
//! supporting JSON and YAML formats.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::instance::{AgentProtocol, CreateRequest, ManagerConfig};
use crate::rpc::RpcConfig;

/// Workspace configuration for berth.
/// Can be defined in .berth.json, .berth/config.json or berth.yaml in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Instance manager settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager: Option<ManagerConfigPartial>,

    /// RPC client settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc: Option<RpcConfigPartial>,

    /// Instances created by `berth run`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<InstanceTemplate>>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Manager settings as they appear in a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_protocol: Option<AgentProtocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_env_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_listener: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timeout_ms: Option<u64>,
}

impl ManagerConfigPartial {
    /// Overlay the fields that are set onto `target`.
    pub fn apply_to(&self, target: &mut ManagerConfig) {
        if let Some(max) = self.max_instances {
            target.max_instances = max;
        }
        if let Some(port) = self.base_port {
            target.base_port = port;
        }
        if let Some(port) = self.max_port {
            target.max_port = port;
        }
        if let Some(ref command) = self.default_command {
            target.default_command = command.clone();
        }
        if let Some(protocol) = self.default_protocol {
            target.default_protocol = protocol;
        }
        if let Some(ref host) = self.listen_host {
            target.listen_host = host.clone();
        }
        if let Some(ref prefix) = self.internal_env_prefix {
            target.internal_env_prefix = prefix.clone();
        }
        if let Some(wait) = self.wait_for_listener {
            target.wait_for_listener = wait;
        }
        if self.rpc_url.is_some() {
            target.rpc_url = self.rpc_url.clone();
        }
        if let Some(ms) = self.stop_timeout_ms {
            target.stop_timeout_ms = ms;
        }
    }
}

/// RPC settings as they appear in a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl RpcConfigPartial {
    /// Overlay the fields that are set onto `target`.
    pub fn apply_to(&self, target: &mut RpcConfig) {
        if let Some(ref url) = self.url {
            target.url = url.clone();
        }
        if let Some(ms) = self.connect_timeout_ms {
            target.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.request_timeout_ms {
            target.request_timeout_ms = ms;
        }
        if let Some(ms) = self.reconnect_interval_ms {
            target.reconnect_interval_ms = ms;
        }
        if let Some(retries) = self.max_retries {
            target.max_retries = retries;
        }
    }
}

/// An instance declared in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<AgentProtocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Start the agent process when the instance is created (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_start: Option<bool>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl InstanceTemplate {
    /// Build a create request for this template.
    pub fn to_request(&self) -> CreateRequest {
        CreateRequest {
            id: self.id.clone(),
            command: self.command.clone(),
            protocol: self.protocol,
            workspace: self.workspace.clone(),
            auto_start: self.auto_start.unwrap_or(true),
            env: self.env.clone(),
        }
    }
}

/// Resolved configuration with all defaults applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub manager: ManagerConfig,
    pub rpc: RpcConfig,
    pub instances: Vec<InstanceTemplate>,
    pub log_level: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            rpc: RpcConfig::default(),
            instances: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl ResolvedConfig {
    /// Check values the manager cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.max_instances == 0 {
            return Err(ConfigError::invalid("manager.maxInstances", "must be at least 1"));
        }
        if self.manager.base_port > self.manager.max_port {
            return Err(ConfigError::invalid(
                "manager.basePort",
                format!(
                    "{} is greater than maxPort {}",
                    self.manager.base_port, self.manager.max_port
                ),
            ));
        }
        if self.manager.listen_host.trim().is_empty() {
            return Err(ConfigError::invalid("manager.listenHost", "must not be empty"));
        }

        let mut seen = std::collections::HashSet::new();
        for template in &self.instances {
            if let Some(ref id) = template.id {
                if !seen.insert(id.as_str()) {
                    return Err(ConfigError::invalid(
                        "instances",
                        format!("duplicate instance id '{}'", id),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_config_deserialize() {
        let json = r#"{
            "manager": {"maxInstances": 3, "basePort": 7000, "maxPort": 7010},
            "rpc": {"url": "ws://127.0.0.1:7777/rpc"},
            "instances": [{"id": "docs", "protocol": "mcp", "workspace": "/srv/docs"}],
            "logLevel": "debug"
        }"#;

        let config: WorkspaceConfig = serde_json::from_str(json).unwrap();
        let manager = config.manager.unwrap();
        assert_eq!(manager.max_instances, Some(3));
        assert_eq!(manager.base_port, Some(7000));
        assert_eq!(config.rpc.unwrap().url.as_deref(), Some("ws://127.0.0.1:7777/rpc"));
        assert_eq!(config.instances.unwrap()[0].protocol, Some(AgentProtocol::Mcp));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_workspace_config_yaml() {
        let yaml = "manager:\n  defaultCommand: my-agent --stdio\ninstances:\n  - id: a\n    autoStart: false\n";
        let config: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.manager.unwrap().default_command.as_deref(),
            Some("my-agent --stdio")
        );
        assert_eq!(config.instances.unwrap()[0].auto_start, Some(false));
    }

    #[test]
    fn test_partial_apply_keeps_unset_fields() {
        let mut manager = ManagerConfig::default();
        ManagerConfigPartial {
            max_port: Some(9005),
            ..Default::default()
        }
        .apply_to(&mut manager);

        assert_eq!(manager.max_port, 9005);
        assert_eq!(manager.base_port, 9000);
        assert_eq!(manager.max_instances, 10);
    }

    #[test]
    fn test_template_to_request() {
        let template = InstanceTemplate {
            id: Some("a".to_string()),
            workspace: Some(PathBuf::from("/w")),
            ..Default::default()
        };
        let request = template.to_request();
        assert_eq!(request.id.as_deref(), Some("a"));
        assert!(request.auto_start);
        assert!(request.command.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(ResolvedConfig::default().validate().is_ok());

        let mut config = ResolvedConfig::default();
        config.manager.max_instances = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = ResolvedConfig::default();
        config.manager.base_port = 9200;
        assert!(config.validate().is_err());

        let mut config = ResolvedConfig::default();
        config.instances = vec![
            InstanceTemplate {
                id: Some("a".to_string()),
                ..Default::default()
            },
            InstanceTemplate {
                id: Some("a".to_string()),
                ..Default::default()
            },
        ];
        assert!(config.validate().is_err());
    }
}

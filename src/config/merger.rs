// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use super::types::{ResolvedConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub max_instances: Option<usize>,
    pub base_port: Option<u16>,
    pub max_port: Option<u16>,
    pub default_command: Option<String>,
    pub listen_host: Option<String>,
    pub rpc_url: Option<String>,
    pub log_level: Option<String>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Workspace config (.berth.json, berth.yaml, ...)
/// 3. Global config (~/.berth/config.json)
/// 4. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    if let Some(config) = global {
        apply_workspace_config(&mut result, &config);
    }

    if let Some(config) = workspace {
        apply_workspace_config(&mut result, &config);
    }

    // CLI options have the final say
    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: &WorkspaceConfig) {
    if let Some(ref manager) = config.manager {
        manager.apply_to(&mut result.manager);
    }

    if let Some(ref rpc) = config.rpc {
        rpc.apply_to(&mut result.rpc);
    }

    // A later source replaces the instance list rather than appending to it
    if let Some(ref instances) = config.instances {
        result.instances = instances.clone();
    }

    if let Some(ref level) = config.log_level {
        result.log_level = level.clone();
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(max) = cli.max_instances {
        result.manager.max_instances = max;
    }

    if let Some(port) = cli.base_port {
        result.manager.base_port = port;
    }

    if let Some(port) = cli.max_port {
        result.manager.max_port = port;
    }

    if let Some(ref command) = cli.default_command {
        result.manager.default_command = command.clone();
    }

    if let Some(ref host) = cli.listen_host {
        result.manager.listen_host = host.clone();
    }

    if let Some(ref url) = cli.rpc_url {
        result.rpc.url = url.clone();
        result.manager.rpc_url = Some(url.clone());
    }

    if let Some(ref level) = cli.log_level {
        result.log_level = level.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{InstanceTemplate, ManagerConfigPartial, RpcConfigPartial};

    #[test]
    fn test_merge_defaults() {
        let config = merge_config(None, None, CliOptions::default());
        assert_eq!(config.manager.max_instances, 10);
        assert_eq!(config.manager.base_port, 9000);
        assert_eq!(config.log_level, "info");
        assert!(config.instances.is_empty());
    }

    #[test]
    fn test_workspace_overrides_global() {
        let global = WorkspaceConfig {
            manager: Some(ManagerConfigPartial {
                max_instances: Some(4),
                default_command: Some("global-agent".to_string()),
                ..Default::default()
            }),
            log_level: Some("warn".to_string()),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            manager: Some(ManagerConfigPartial {
                default_command: Some("workspace-agent".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), CliOptions::default());
        assert_eq!(config.manager.max_instances, 4);
        assert_eq!(config.manager.default_command, "workspace-agent");
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_cli_wins() {
        let workspace = WorkspaceConfig {
            manager: Some(ManagerConfigPartial {
                base_port: Some(7000),
                ..Default::default()
            }),
            rpc: Some(RpcConfigPartial {
                url: Some("ws://file/rpc".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cli = CliOptions {
            base_port: Some(8000),
            rpc_url: Some("ws://cli/rpc".to_string()),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        let config = merge_config(None, Some(workspace), cli);
        assert_eq!(config.manager.base_port, 8000);
        assert_eq!(config.rpc.url, "ws://cli/rpc");
        assert_eq!(config.manager.rpc_url.as_deref(), Some("ws://cli/rpc"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_instances_replaced_not_merged() {
        let template = |id: &str| InstanceTemplate {
            id: Some(id.to_string()),
            ..Default::default()
        };
        let global = WorkspaceConfig {
            instances: Some(vec![template("a"), template("b")]),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            instances: Some(vec![template("c")]),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), CliOptions::default());
        assert_eq!(config.instances, vec![template("c")]);
    }
}

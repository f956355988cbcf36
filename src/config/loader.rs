// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::instance::AgentProtocol;

use super::types::{InstanceTemplate, ManagerConfigPartial, RpcConfigPartial, WorkspaceConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[".berth.json", ".berth/config.json", "berth.yaml", "berth.yml"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".berth";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.berth/config.json.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the workspace root.
///
/// The first file found in [`CONFIG_FILES`] wins.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(WorkspaceConfig::default());
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        "json" => serde_json::from_str(&content).map_err(ConfigError::from),
        other => Err(ConfigError::InvalidFormat(format!(
            "unsupported config extension '{}' for {}",
            other,
            path.display()
        ))),
    }
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = workspace_root.join(filename);

    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::to_string(config)?,
        _ => serde_json::to_string_pretty(config)?,
    };
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Initialize a new config file with the example configuration.
///
/// Refuses to overwrite an existing file.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    let path = workspace_root.join(CONFIG_FILES[0]);
    if path.exists() {
        return Err(ConfigError::InvalidValue {
            field: "path".to_string(),
            message: format!("{} already exists", path.display()),
        });
    }

    let config = config.unwrap_or_else(get_example_config);
    save_workspace_config(workspace_root, &config, None)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        for filename in CONFIG_FILES {
            if current.join(filename).exists() {
                return Some(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Get an example configuration.
pub fn get_example_config() -> WorkspaceConfig {
    WorkspaceConfig {
        manager: Some(ManagerConfigPartial {
            max_instances: Some(4),
            base_port: Some(9000),
            max_port: Some(9010),
            default_command: Some("acp-agent --stdio".to_string()),
            ..Default::default()
        }),
        rpc: Some(RpcConfigPartial {
            url: Some("ws://127.0.0.1:8900/rpc".to_string()),
            ..Default::default()
        }),
        instances: Some(vec![InstanceTemplate {
            id: Some("docs".to_string()),
            protocol: Some(AgentProtocol::Mcp),
            workspace: Some(PathBuf::from(".")),
            ..Default::default()
        }]),
        log_level: Some("info".to_string()),
    }
}

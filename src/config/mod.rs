// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for berth.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.berth/config.json
//! - Workspace config: .berth.json, .berth/config.json, berth.yaml, or berth.yml
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{
    InstanceTemplate, ManagerConfigPartial, ResolvedConfig, RpcConfigPartial, WorkspaceConfig,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge, and validate all configuration sources for a workspace.
///
/// When no source names an RPC URL, the URL advertised in the environment
/// (`BERTH_RPC_URL`) is used.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;

    let mut config = merge_config(global, workspace, cli_options);
    if config.rpc.url.is_empty() {
        config.rpc.url = crate::rpc::RpcConfig::from_env(&config.manager.internal_env_prefix).url;
    }
    config.validate()?;
    Ok(config)
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Environment assembly for spawned agents.

use std::collections::HashMap;
use std::ffi::OsString;

use tracing::debug;

/// Variable carrying the instance identifier (after the internal prefix).
pub const INSTANCE_ID_VAR: &str = "INSTANCE_ID";
/// Variable carrying the instance port (after the internal prefix).
pub const INSTANCE_PORT_VAR: &str = "INSTANCE_PORT";
/// Variable carrying the parent RPC endpoint (after the internal prefix).
pub const RPC_URL_VAR: &str = "RPC_URL";

/// Build the environment for an agent process.
///
/// Inherited variables starting with `internal_prefix` are dropped, then
/// `control` is applied, then `overrides`. Later layers win on conflict.
/// Inherited entries whose key or value is not valid UTF-8 are skipped.
pub fn build_environment<I, K, V>(
    inherited: I,
    internal_prefix: &str,
    control: &[(String, String)],
    overrides: &HashMap<String, String>,
) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    let mut env: HashMap<String, String> = inherited
        .into_iter()
        .filter_map(|(key, value)| match (key.into().into_string(), value.into().into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (Ok(key), Err(_)) => {
                debug!(key = %key, "Skipping inherited variable with non-UTF-8 value");
                None
            }
            (Err(key), _) => {
                debug!(key = ?key, "Skipping inherited variable with non-UTF-8 name");
                None
            }
        })
        .filter(|(key, _)| internal_prefix.is_empty() || !key.starts_with(internal_prefix))
        .collect();

    env.extend(control.iter().cloned());
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Control variables the manager hands to every agent it launches.
pub fn control_vars(
    internal_prefix: &str,
    instance_id: &str,
    port: u16,
    rpc_url: Option<&str>,
) -> Vec<(String, String)> {
    let mut vars = vec![
        (format!("{}{}", internal_prefix, INSTANCE_ID_VAR), instance_id.to_string()),
        (format!("{}{}", internal_prefix, INSTANCE_PORT_VAR), port.to_string()),
    ];
    if let Some(url) = rpc_url {
        vars.push((format!("{}{}", internal_prefix, RPC_URL_VAR), url.to_string()));
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inherited() -> Vec<(String, String)> {
        vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("HOME".to_string(), "/home/agent".to_string()),
            ("BERTH_SECRET".to_string(), "parent-only".to_string()),
            ("BERTH_INSTANCE_ID".to_string(), "parent".to_string()),
        ]
    }

    #[test]
    fn test_strips_internal_prefix() {
        let env = build_environment(inherited(), "BERTH_", &[], &HashMap::new());
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert!(!env.contains_key("BERTH_SECRET"));
        assert!(!env.contains_key("BERTH_INSTANCE_ID"));
    }

    #[test]
    fn test_overrides_win() {
        let mut overrides = HashMap::new();
        overrides.insert("HOME".to_string(), "/tmp/agent".to_string());
        overrides.insert("NEW_VAR".to_string(), "1".to_string());

        let env = build_environment(inherited(), "BERTH_", &[], &overrides);
        assert_eq!(env.get("HOME").map(String::as_str), Some("/tmp/agent"));
        assert_eq!(env.get("NEW_VAR").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_overrides_may_set_prefixed_vars() {
        let mut overrides = HashMap::new();
        overrides.insert("BERTH_SECRET".to_string(), "explicit".to_string());

        let env = build_environment(inherited(), "BERTH_", &[], &overrides);
        assert_eq!(env.get("BERTH_SECRET").map(String::as_str), Some("explicit"));
    }

    #[test]
    fn test_control_vars_replace_inherited() {
        let control = control_vars("BERTH_", "agent-1", 9001, Some("ws://127.0.0.1:7000/rpc"));
        let env = build_environment(inherited(), "BERTH_", &control, &HashMap::new());

        assert_eq!(env.get("BERTH_INSTANCE_ID").map(String::as_str), Some("agent-1"));
        assert_eq!(env.get("BERTH_INSTANCE_PORT").map(String::as_str), Some("9001"));
        assert_eq!(
            env.get("BERTH_RPC_URL").map(String::as_str),
            Some("ws://127.0.0.1:7000/rpc")
        );
        assert!(!env.contains_key("BERTH_SECRET"));
    }

    #[cfg(unix)]
    #[test]
    fn test_skips_non_utf8_entries() {
        use std::os::unix::ffi::OsStringExt;

        let inherited = vec![
            (OsString::from("PATH"), OsString::from("/usr/bin")),
            (OsString::from("BAD_VALUE"), OsString::from_vec(vec![0xff, 0xfe])),
            (OsString::from_vec(vec![b'K', 0xff]), OsString::from("1")),
        ];

        let env = build_environment(inherited, "BERTH_", &[], &HashMap::new());
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
    }

    #[test]
    fn test_empty_prefix_strips_nothing() {
        let env = build_environment(inherited(), "", &[], &HashMap::new());
        assert_eq!(env.len(), 4);
    }
}

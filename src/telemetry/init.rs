// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry initialization and configuration.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level for berth's own targets when RUST_LOG is not set.
    pub default_level: Level,

    /// Whether to log span close events with timings.
    pub include_span_events: bool,

    /// Whether to include file/line information.
    pub include_file_line: bool,

    /// Whether to include target module path.
    pub include_target: bool,

    /// Whether to use ANSI colors in output.
    pub ansi_colors: bool,

    /// Whether to use compact log format.
    pub compact: bool,

    /// Custom filter directive (overrides RUST_LOG and default_level).
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_span_events: false,
            include_file_line: false,
            include_target: true,
            ansi_colors: true,
            compact: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Verbose output for local debugging.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_file_line: true,
            compact: false,
            ..Self::default()
        }
    }

    /// Minimal, uncolored output for long-running supervisors.
    pub fn production() -> Self {
        Self {
            default_level: Level::WARN,
            include_target: false,
            ansi_colors: false,
            ..Self::default()
        }
    }

    /// Trace everything from this crate.
    pub fn testing() -> Self {
        Self {
            default_level: Level::TRACE,
            include_span_events: true,
            include_file_line: true,
            ansi_colors: false,
            compact: false,
            filter_directive: Some("berth=trace".to_string()),
            ..Self::default()
        }
    }

    /// Default config at the level named by a config file (`logLevel`).
    ///
    /// Unknown names fall back to `info`.
    pub fn from_log_level(level: &str) -> Self {
        Self::default().with_level(parse_level(level).unwrap_or(Level::INFO))
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set a custom filter directive.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    /// Filter used when neither a directive nor RUST_LOG is set.
    ///
    /// Dependencies stay at `warn` so hyper and tungstenite do not drown out
    /// instance logs.
    pub fn default_directive(&self) -> String {
        format!("warn,berth={}", self.default_level.as_str().to_lowercase())
    }
}

/// Parse a level name such as `debug` or `WARN`.
pub fn parse_level(level: &str) -> Option<Level> {
    level.trim().parse().ok()
}

/// Initialize telemetry with the given configuration.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<()> {
    let fallback = || EnvFilter::new(config.default_directive());
    let filter = match &config.filter_directive {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
    };

    let span_events = if config.include_span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.compact {
        registry.with(fmt_layer.compact()).try_init()
    } else {
        registry.with(fmt_layer).try_init()
    };

    result.map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_presets() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_level, Level::INFO);
        assert!(config.compact);

        let config = TelemetryConfig::development();
        assert_eq!(config.default_level, Level::DEBUG);
        assert!(config.include_span_events);

        let config = TelemetryConfig::production();
        assert_eq!(config.default_level, Level::WARN);
        assert!(!config.ansi_colors);

        let config = TelemetryConfig::testing();
        assert_eq!(config.filter_directive.as_deref(), Some("berth=trace"));
    }

    #[test]
    fn test_from_log_level() {
        assert_eq!(TelemetryConfig::from_log_level("debug").default_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_log_level("ERROR").default_level, Level::ERROR);
        assert_eq!(TelemetryConfig::from_log_level("loud").default_level, Level::INFO);
    }

    #[test]
    fn test_default_directive() {
        let config = TelemetryConfig::default().with_level(Level::DEBUG);
        assert_eq!(config.default_directive(), "warn,berth=debug");
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::default()
            .with_filter("berth::rpc=trace")
            .with_ansi(false);

        assert_eq!(config.filter_directive, Some("berth::rpc=trace".to_string()));
        assert!(!config.ansi_colors);
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging setup.
//!
//! berth logs through `tracing`. Initialize a subscriber once at startup:
//!
//! ```rust,no_run
//! use berth::telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::from_log_level("debug")).ok();
//! ```
//!
//! Manager operations carry `#[instrument]` spans, and every instance
//! listener runs inside an `instance` span with `id` and `port` fields, so
//! log lines from a single agent can be filtered together.

mod init;

pub use init::{init_telemetry, parse_level, TelemetryConfig};

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent-to-parent RPC.
//!
//! A spawned agent uses an [`RpcClient`] to call back into the process that
//! launched it. Requests and replies are JSON [`Envelope`]s correlated by ID
//! over a single WebSocket connection.
//!
//! # Example
//!
//! ```rust,no_run
//! use berth::rpc::{RpcClient, RpcConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RpcClient::new(RpcConfig::from_env("BERTH_"));
//! client.connect().await?;
//!
//! let status: serde_json::Value = client
//!     .request_payload("status", &serde_json::json!({}))
//!     .await?;
//! println!("{}", status);
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;

pub use client::{RpcClient, RpcConfig};
pub use error::{RpcError, RpcResult};
pub use protocol::{decode, encode, generate_request_id, Envelope, ErrorBody, MessageKind};

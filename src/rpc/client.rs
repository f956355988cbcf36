// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! RPC client for spawned agents.
//!
//! The client keeps one WebSocket connection to the parent and multiplexes
//! any number of concurrent requests over it. Each request registers a
//! single-use reply slot under its correlation ID; the read loop fills the
//! slot when the matching response arrives. When the connection drops every
//! outstanding slot is filled with a transport error instead, so no caller
//! is left waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::error::{RpcError, RpcResult};
use super::protocol::{decode, encode, Envelope};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for [`RpcClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcConfig {
    /// WebSocket URL of the parent endpoint.
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Deadline applied by [`RpcClient::request`].
    pub request_timeout_ms: u64,
    /// Reserved for automatic reconnection; not acted on.
    pub reconnect_interval_ms: u64,
    /// Reserved for automatic reconnection; not acted on.
    pub max_retries: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            reconnect_interval_ms: 5_000,
            max_retries: 5,
        }
    }
}

impl RpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Defaults, with the URL taken from `<prefix>RPC_URL` when set.
    pub fn from_env(prefix: &str) -> Self {
        let var = format!("{}{}", prefix, crate::instance::env::RPC_URL_VAR);
        match std::env::var(&var) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ============================================================================
// Client
// ============================================================================

/// What a waiting request receives.
enum Reply {
    Message(Envelope),
    Disconnected(String),
}

/// Reply slot for one outstanding request.
struct Pending {
    /// Connection the request was written to.
    generation: u64,
    tx: oneshot::Sender<Reply>,
}

struct ConnState {
    connected: bool,
    /// Incremented by every successful connect.
    generation: u64,
}

struct Inner {
    config: RpcConfig,
    state: RwLock<ConnState>,
    /// Serializes connect attempts without holding `state` across the dial.
    connecting: Mutex<()>,
    writer: Mutex<Option<(u64, WsSink)>>,
    pending: StdMutex<HashMap<String, Pending>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

/// Bidirectional RPC client.
///
/// Cloning is cheap; clones share the connection and correlation table.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Create a disconnected client.
    pub fn new(config: RpcConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(ConnState {
                    connected: false,
                    generation: 0,
                }),
                connecting: Mutex::new(()),
                writer: Mutex::new(None),
                pending: StdMutex::new(HashMap::new()),
                reader: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Connect to the configured URL and start the read loop.
    ///
    /// Does nothing if already connected.
    pub async fn connect(&self) -> RpcResult<()> {
        let _connecting = self.inner.connecting.lock().await;
        if self.inner.state.read().await.connected {
            return Ok(());
        }

        let url = self.inner.config.url.clone();
        let connect_failed = |message: String| RpcError::ConnectFailed {
            url: url.clone(),
            message,
        };
        if url.trim().is_empty() {
            return Err(connect_failed("no URL configured".to_string()));
        }

        let timeout = self.inner.config.connect_timeout();
        let stream = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return Err(connect_failed(e.to_string())),
            Err(_) => return Err(connect_failed(format!("timed out after {:?}", timeout))),
        };
        let (sink, source) = stream.split();

        let generation = {
            let mut state = self.inner.state.write().await;
            state.generation += 1;
            *self.inner.writer.lock().await = Some((state.generation, sink));
            state.connected = true;
            state.generation
        };

        let inner = Arc::clone(&self.inner);
        let reader = tokio::spawn(
            read_loop(inner, generation, source).instrument(info_span!("rpc_reader", generation)),
        );
        *lock_unpoisoned(&self.inner.reader) = Some(reader);

        info!(url = %url, generation, "Connected to RPC endpoint");
        Ok(())
    }

    /// Close the connection.
    ///
    /// Requests still waiting on this connection fail with a transport
    /// error. Does nothing if not connected.
    pub async fn close(&self) {
        let generation = {
            let mut state = self.inner.state.write().await;
            if !state.connected {
                return;
            }
            state.connected = false;
            state.generation
        };

        let sink = self.inner.writer.lock().await.take();
        if let Some((_, mut sink)) = sink {
            if let Err(e) = sink.close().await {
                debug!("Error closing RPC connection: {}", e);
            }
        }
        if let Some(reader) = lock_unpoisoned(&self.inner.reader).take() {
            reader.abort();
        }

        self.inner.fail_pending(generation, "connection closed by client");
        info!(generation, "Closed RPC connection");
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.read().await.connected
    }

    /// Number of requests waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        lock_unpoisoned(&self.inner.pending).len()
    }

    /// Send a request and wait for its reply, using the configured timeout.
    ///
    /// The reply may be an error envelope; see [`request_payload`](Self::request_payload)
    /// for a typed call.
    pub async fn request(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> RpcResult<Envelope> {
        self.request_with_timeout(action, payload, self.inner.config.request_timeout())
            .await
    }

    /// Send a request and wait at most `timeout` for its reply.
    pub async fn request_with_timeout(
        &self,
        action: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> RpcResult<Envelope> {
        match tokio::time::timeout(timeout, self.exchange(action, payload)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(action, ?timeout, "RPC request timed out");
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    /// Send a request and wait for its reply or for `cancel` to fire.
    pub async fn request_with_cancel(
        &self,
        action: &str,
        payload: serde_json::Value,
        cancel: &CancellationToken,
    ) -> RpcResult<Envelope> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(action, "RPC request cancelled");
                Err(RpcError::Cancelled)
            }
            result = self.exchange(action, payload) => result,
        }
    }

    /// Send a typed request and decode the typed reply.
    ///
    /// An error envelope becomes [`RpcError::Remote`].
    pub async fn request_payload<T, P>(&self, action: &str, payload: &P) -> RpcResult<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        let reply = self.request(action, payload).await?;

        if let Some(body) = reply.error_body() {
            return Err(RpcError::Remote {
                code: body.code,
                message: body.message,
            });
        }
        serde_json::from_value(reply.payload).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Register, send, and wait. Dropping the future removes the entry.
    async fn exchange(&self, action: &str, payload: serde_json::Value) -> RpcResult<Envelope> {
        let generation = {
            let state = self.inner.state.read().await;
            if !state.connected {
                return Err(RpcError::NotConnected);
            }
            state.generation
        };

        let envelope = Envelope::request(action, payload);
        let text = encode(&envelope)?;
        let (tx, rx) = oneshot::channel();
        let _guard = self.inner.register(envelope.id.clone(), generation, tx);

        self.inner.write(generation, Message::Text(text)).await?;
        debug!(request_id = %envelope.id, action, "Sent RPC request");

        match rx.await {
            Ok(Reply::Message(reply)) => Ok(reply),
            Ok(Reply::Disconnected(reason)) => Err(RpcError::Transport(reason)),
            Err(_) => Err(RpcError::Transport("connection closed".to_string())),
        }
    }
}

impl Inner {
    fn register(&self, id: String, generation: u64, tx: oneshot::Sender<Reply>) -> PendingGuard<'_> {
        lock_unpoisoned(&self.pending).insert(id.clone(), Pending { generation, tx });
        PendingGuard {
            table: &self.pending,
            id,
        }
    }

    async fn write(&self, generation: u64, message: Message) -> RpcResult<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some((current, sink)) if *current == generation => sink
                .send(message)
                .await
                .map_err(|e| RpcError::Transport(e.to_string())),
            _ => Err(RpcError::Transport("connection closed".to_string())),
        }
    }

    /// Deliver one inbound frame to its waiter.
    fn route(&self, text: &str) {
        let envelope = match decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed RPC frame: {}", e);
                return;
            }
        };

        if !envelope.is_reply() {
            debug!(request_id = %envelope.id, kind = ?envelope.kind, "Ignoring non-reply RPC frame");
            return;
        }

        let pending = lock_unpoisoned(&self.pending).remove(&envelope.id);
        match pending {
            Some(pending) => {
                let _ = pending.tx.send(Reply::Message(envelope));
            }
            None => debug!(request_id = %envelope.id, "Dropping reply for unknown request"),
        }
    }

    /// Tear down `generation` after its read loop ended.
    async fn handle_disconnect(&self, generation: u64, reason: &str) {
        {
            let mut state = self.state.write().await;
            if state.generation == generation {
                state.connected = false;
            }
            let mut writer = self.writer.lock().await;
            if matches!(writer.as_ref(), Some((current, _)) if *current == generation) {
                *writer = None;
            }
        }
        self.fail_pending(generation, reason);
    }

    /// Fail every request waiting on `generation`.
    fn fail_pending(&self, generation: u64, reason: &str) {
        let drained: Vec<Pending> = {
            let mut table = lock_unpoisoned(&self.pending);
            let ids: Vec<String> = table
                .iter()
                .filter(|(_, pending)| pending.generation == generation)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };

        if !drained.is_empty() {
            warn!(count = drained.len(), "Failing pending RPC requests: {}", reason);
        }
        for pending in drained {
            let _ = pending.tx.send(Reply::Disconnected(reason.to_string()));
        }
    }
}

/// Removes a correlation entry when its request finishes or is abandoned.
struct PendingGuard<'a> {
    table: &'a StdMutex<HashMap<String, Pending>>,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_unpoisoned(self.table).remove(&self.id);
    }
}

async fn read_loop(inner: Arc<Inner>, generation: u64, mut source: WsSource) {
    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => inner.route(&text),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => inner.route(text),
                Err(_) => warn!("Dropping non-UTF-8 binary RPC frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                match &frame {
                    Some(frame) if !is_normal_close(frame.code) => warn!(
                        code = u16::from(frame.code),
                        reason = %frame.reason,
                        "RPC connection closed abnormally"
                    ),
                    _ => debug!("RPC connection closed by peer"),
                }
                break "connection closed by peer".to_string();
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                match &e {
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                        debug!("RPC connection closed: {}", e)
                    }
                    _ => warn!("RPC read failed: {}", e),
                }
                break e.to_string();
            }
            None => break "connection closed".to_string(),
        }
    };

    inner.handle_disconnect(generation, &reason).await;
    debug!("RPC read loop stopped");
}

fn is_normal_close(code: CloseCode) -> bool {
    matches!(code, CloseCode::Normal | CloseCode::Away)
}

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::MessageKind;
    use serde_json::json;
    use std::future::Future;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type PeerStream = WebSocketStream<TcpStream>;

    /// Accept one WebSocket connection and hand it to `handler`.
    async fn spawn_peer<F, Fut>(handler: F) -> String
    where
        F: FnOnce(PeerStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = accept_async(tcp).await.unwrap();
            handler(ws).await;
        });
        format!("ws://{}", addr)
    }

    async fn next_request(ws: &mut PeerStream) -> Option<Envelope> {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                return decode(&text).ok();
            }
        }
        None
    }

    async fn reply(ws: &mut PeerStream, envelope: Envelope) {
        ws.send(Message::Text(encode(&envelope).unwrap())).await.unwrap();
    }

    /// Echo payloads back; `fail` gets an error envelope, `silent` nothing.
    async fn echo_peer(mut ws: PeerStream) {
        while let Some(request) = next_request(&mut ws).await {
            match request.action.as_str() {
                "fail" => reply(&mut ws, Envelope::error(request.id, "denied", "not allowed")).await,
                "silent" => {}
                "garbage" => {
                    ws.send(Message::Text("not json".to_string())).await.unwrap();
                    reply(&mut ws, Envelope::response(request.id, request.payload)).await;
                }
                _ => reply(&mut ws, Envelope::response(request.id, request.payload)).await,
            }
        }
    }

    async fn connected_client(url: String) -> RpcClient {
        let client = RpcClient::new(RpcConfig::new(url));
        client.connect().await.unwrap();
        client
    }

    async fn wait_for_pending(client: &RpcClient, count: usize) {
        for _ in 0..200 {
            if client.pending_requests() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} pending requests", count);
    }

    #[tokio::test]
    async fn test_request_before_connect() {
        let client = RpcClient::new(RpcConfig::new("ws://127.0.0.1:1"));
        let err = client.request("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::NotConnected));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = RpcClient::new(RpcConfig::new(format!("ws://{}", addr)));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectFailed { .. }));
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_without_url() {
        let client = RpcClient::new(RpcConfig::default());
        assert!(matches!(
            client.connect().await,
            Err(RpcError::ConnectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_response() {
        let url = spawn_peer(echo_peer).await;
        let client = connected_client(url).await;

        let reply = client.request("ping", json!({"n": 1})).await.unwrap();
        assert_eq!(reply.kind, MessageKind::Response);
        assert_eq!(reply.payload, json!({"n": 1}));
        assert_eq!(client.pending_requests(), 0);

        client.close().await;
    }

    #[tokio::test]
    async fn test_request_payload_typed() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Echo {
            value: String,
        }

        let url = spawn_peer(echo_peer).await;
        let client = connected_client(url).await;

        let echo: Echo = client
            .request_payload("echo", &Echo { value: "hi".to_string() })
            .await
            .unwrap();
        assert_eq!(echo.value, "hi");

        let err = client
            .request_payload::<Echo, _>("fail", &json!({}))
            .await
            .unwrap_err();
        match err {
            RpcError::Remote { code, message } => {
                assert_eq!(code, "denied");
                assert_eq!(message, "not allowed");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = client
            .request_payload::<Echo, _>("echo", &json!({"other": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));

        client.close().await;
    }

    #[tokio::test]
    async fn test_timeout_clears_table() {
        let url = spawn_peer(echo_peer).await;
        let client = connected_client(url).await;

        let started = tokio::time::Instant::now();
        let err = client
            .request_with_timeout("silent", json!({}), Duration::from_millis(500))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(client.pending_requests(), 0);
        assert!(client.is_connected().await);

        client.close().await;
    }

    #[tokio::test]
    async fn test_cancel_returns_promptly() {
        let url = spawn_peer(echo_peer).await;
        let client = connected_client(url).await;

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = client
            .request_with_cancel("silent", json!({}), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Cancelled));
        assert_eq!(client.pending_requests(), 0);

        // The connection is still usable
        let reply = client.request("ping", json!(null)).await.unwrap();
        assert_eq!(reply.kind, MessageKind::Response);

        client.close().await;
    }

    #[tokio::test]
    async fn test_disconnect_fails_all_pending() {
        let url = spawn_peer(|mut ws: PeerStream| async move {
            next_request(&mut ws).await;
            next_request(&mut ws).await;
            let _ = ws.close(None).await;
        })
        .await;
        let client = connected_client(url).await;

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.request("a", json!({})).await }
        });
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.request("b", json!({})).await }
        });

        for result in [first.await.unwrap(), second.await.unwrap()] {
            assert!(matches!(result, Err(RpcError::Transport(_))));
        }
        assert!(!client.is_connected().await);
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_replies_routed_out_of_order() {
        let url = spawn_peer(|mut ws: PeerStream| async move {
            let a = next_request(&mut ws).await.unwrap();
            let b = next_request(&mut ws).await.unwrap();
            reply(&mut ws, Envelope::response(b.id, b.payload)).await;
            reply(&mut ws, Envelope::response(a.id, a.payload)).await;
            echo_peer(ws).await;
        })
        .await;
        let client = connected_client(url).await;

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.request("a", json!("first")).await }
        });
        wait_for_pending(&client, 1).await;
        let second = client.request("b", json!("second")).await.unwrap();

        assert_eq!(second.payload, json!("second"));
        assert_eq!(first.await.unwrap().unwrap().payload, json!("first"));

        client.close().await;
    }

    #[tokio::test]
    async fn test_malformed_frame_dropped() {
        let url = spawn_peer(echo_peer).await;
        let client = connected_client(url).await;

        let reply = client.request("garbage", json!(7)).await.unwrap();
        assert_eq!(reply.payload, json!(7));
        assert!(client.is_connected().await);

        client.close().await;
    }

    #[tokio::test]
    async fn test_connect_and_close_idempotent() {
        let url = spawn_peer(echo_peer).await;
        let client = connected_client(url).await;

        // The peer accepts a single connection, so a second dial would fail
        client.connect().await.unwrap();
        assert!(client.is_connected().await);

        client.close().await;
        client.close().await;
        assert!(!client.is_connected().await);

        let err = client.request("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_fails_pending() {
        let url = spawn_peer(echo_peer).await;
        let client = connected_client(url).await;

        let waiting = tokio::spawn({
            let client = client.clone();
            async move { client.request("silent", json!({})).await }
        });
        wait_for_pending(&client, 1).await;

        client.close().await;
        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(RpcError::Transport(_))));
        assert_eq!(client.pending_requests(), 0);
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: RpcConfig = serde_json::from_str(r#"{"url": "ws://parent/rpc"}"#).unwrap();
        assert_eq!(config.url, "ws://parent/rpc");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 5);
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-instance network listeners.
//!
//! Each instance serves an application router built by a [`HandlerFactory`]
//! on its own port. The accept loop runs on a background task owned by a
//! [`ListenerHandle`], which carries the task's cancellation token and join
//! handle so teardown can wait for it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use super::error::{InstanceError, InstanceResult};
use super::supervisor::ProcessSupervisor;
use super::types::InstanceConfig;

/// Builds the application handler served on an instance's port.
pub trait HandlerFactory: Send + Sync {
    fn build(
        &self,
        config: &InstanceConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
        span: Span,
    ) -> Router;
}

impl<F> HandlerFactory for F
where
    F: Fn(&InstanceConfig, Arc<dyn ProcessSupervisor>, Span) -> Router + Send + Sync,
{
    fn build(
        &self,
        config: &InstanceConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
        span: Span,
    ) -> Router {
        self(config, supervisor, span)
    }
}

/// Body returned by the fallback handler.
pub const UNAVAILABLE_BODY: &str = "instance handler not configured";

/// Router that answers every request with `503 Service Unavailable`.
pub fn unavailable_router() -> Router {
    Router::new().fallback(|| async { (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY) })
}

/// Background task serving one instance's router.
pub struct ListenerHandle {
    addr: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    ready: Option<oneshot::Receiver<io::Result<SocketAddr>>>,
}

impl ListenerHandle {
    /// Bind `addr` and serve `router` on a new task.
    ///
    /// Returns immediately; bind failures are logged and reported through
    /// [`wait_ready`](Self::wait_ready).
    pub fn spawn(addr: impl Into<String>, router: Router, span: Span) -> Self {
        let addr = addr.into();
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let bind_addr = addr.clone();
        let shutdown = cancel.clone();
        let task = tokio::spawn(
            async move {
                let listener = match TcpListener::bind(&bind_addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!(addr = %bind_addr, "Failed to bind instance listener: {}", e);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let local_addr = listener.local_addr();
                if let Ok(local) = &local_addr {
                    info!(addr = %local, "Instance listener started");
                }
                let _ = ready_tx.send(local_addr);

                let serve = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await });
                if let Err(e) = serve.await {
                    error!(addr = %bind_addr, "Instance listener failed: {}", e);
                }
                debug!(addr = %bind_addr, "Instance listener stopped");
            }
            .instrument(span),
        );

        Self {
            addr,
            cancel,
            task,
            ready: Some(ready_rx),
        }
    }

    /// Address the listener was asked to bind.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Wait until the listener is bound and return its local address.
    pub async fn wait_ready(&mut self) -> InstanceResult<SocketAddr> {
        let ready = self.ready.take().ok_or_else(|| InstanceError::ListenerFailed {
            addr: self.addr.clone(),
            message: "readiness already consumed".to_string(),
        })?;

        match ready.await {
            Ok(Ok(local)) => Ok(local),
            Ok(Err(e)) => Err(InstanceError::listener(self.addr.clone(), e)),
            Err(_) => Err(InstanceError::ListenerFailed {
                addr: self.addr.clone(),
                message: "listener task ended before binding".to_string(),
            }),
        }
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the accept loop and wait for the task to exit.
    ///
    /// The task is aborted if it has not finished within `grace`.
    pub async fn shutdown(mut self, grace: Duration) -> InstanceResult<()> {
        self.cancel.cancel();

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(InstanceError::ListenerShutdown(format!("{}: {}", self.addr, e))),
            Err(_) => {
                warn!(addr = %self.addr, "Listener did not stop within {:?}; aborting", grace);
                self.task.abort();
                Err(InstanceError::ListenerShutdown(format!(
                    "{}: timed out after {:?}",
                    self.addr, grace
                )))
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        // Stop the accept loop when the owner goes away without a shutdown
        self.cancel.cancel();
    }
}

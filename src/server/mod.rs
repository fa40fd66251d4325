//! Control protocol server: a warp WebSocket endpoint.
//!
//! Each connection is an observer. Its inbound frames are handled one at a
//! time; separate connections are served concurrently. Replies and
//! broadcasts share the connection's outbound queue, so every frame is
//! written whole by a single writer task.

pub mod handlers;
pub mod observers;
pub mod protocol;

#[cfg(test)]
mod tests;

pub use handlers::{ControlContext, ControlServices, PresentationState, TouchConfig, WindowConfig};
pub use observers::{BroadcastReport, FrameBroadcaster, LipSyncBroadcaster, ObserverSet};
pub use protocol::{Command, Envelope, ProtocolError, PROTOCOL_VERSION};

use crate::utils::shutdown::ShutdownSignal;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use warp::filters::path::FullPath;
use warp::ws::{Message, WebSocket};
use warp::Filter;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path segment of the WebSocket endpoint. The root path is always accepted too.
    pub path: String,
    /// Outbound frames buffered per observer before broadcasts start dropping.
    pub observer_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8765,
            path: "sprite".into(),
            observer_queue: 256,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, self.port)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
    #[error("failed to bind control server: {0}")]
    Bind(#[source] warp::Error),
}

/// Accept `/` and `/<path>`.
fn endpoint(path: &str) -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    let accepted: Arc<[String]> = Arc::from(vec![
        "/".to_string(),
        format!("/{}", path.trim_matches('/')),
    ]);
    warp::path::full()
        .and_then(move |full: FullPath| {
            let ok = accepted.iter().any(|p| p == full.as_str());
            async move {
                if ok {
                    Ok::<(), warp::Rejection>(())
                } else {
                    Err(warp::reject::not_found())
                }
            }
        })
        .untuple_one()
}

pub fn routes(
    ctx: Arc<ControlContext>,
    path: &str,
    shutdown: ShutdownSignal,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    endpoint(path)
        .and(warp::ws())
        .and(warp::any().map(move || ctx.clone()))
        .and(warp::any().map(move || shutdown.clone()))
        .map(|ws: warp::ws::Ws, ctx: Arc<ControlContext>, shutdown: ShutdownSignal| {
            ws.on_upgrade(move |socket| handle_connection(socket, ctx, shutdown))
        })
}

/// Bind and serve until `shutdown` fires. Binding is the one fatal failure.
pub fn serve(
    config: &ServerConfig,
    ctx: Arc<ControlContext>,
    shutdown: ShutdownSignal,
) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
    let addr = config.socket_addr()?;
    let mut stop = shutdown.clone();
    let (bound, server) = warp::serve(routes(ctx, &config.path, shutdown))
        .try_bind_with_graceful_shutdown(addr, async move { stop.wait().await })
        .map_err(ServerError::Bind)?;
    tracing::info!(
        "control server listening on ws://{}/{}",
        bound,
        config.path.trim_matches('/')
    );
    let task = tokio::spawn(async move {
        server.await;
        tracing::info!("control server stopped");
    });
    Ok((bound, task))
}

async fn handle_connection(
    socket: WebSocket,
    ctx: Arc<ControlContext>,
    mut shutdown: ShutdownSignal,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let observers = ctx.observers().clone();
    let (id, replies, mut outbound) = observers.register();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if ws_tx.send(Message::text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let message = tokio::select! {
            message = ws_rx.next() => message,
            _ = shutdown.wait() => break,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(observer = %id, error = %e, "websocket receive failed");
                break;
            }
            None => break,
        };
        if message.is_close() {
            break;
        }

        let reply = if let Ok(text) = message.to_str() {
            tokio::select! {
                reply = ctx.handle_text(text) => reply,
                _ = shutdown.wait() => break,
            }
        } else if message.is_binary() {
            ProtocolError::Decode("binary frames are not supported".into()).to_envelope()
        } else {
            continue;
        };

        if replies.send(Arc::from(reply.to_text())).await.is_err() {
            break;
        }
    }

    observers.remove(&id);
    drop(replies);
    let _ = writer.await;
}

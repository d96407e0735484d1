//! Gateway server implementation

use super::client;
use super::connection::{frame_text, run_connection};
use crate::config::{GatewayConfig, UpstreamConfig};
use crate::error::{Error, Result};
use crate::transport::{HandlerTable, WsTransport};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{future, SinkExt, StreamExt};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Gateway server state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    /// Not started
    Stopped,
    /// Starting up
    Starting,
    /// Running
    Running,
    /// Shutting down
    ShuttingDown,
}

/// Snapshot reported by `/health`
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub state: GatewayState,
    pub version: String,
    pub address: Option<String>,
    pub connections: usize,
    pub paths: Vec<String>,
}

#[derive(Clone)]
struct ServerState {
    handlers: Arc<HandlerTable>,
    shutdown: CancellationToken,
    connections: Arc<AtomicUsize>,
}

/// Tasker WebSocket gateway
pub struct Gateway {
    config: GatewayConfig,
    handlers: Arc<HandlerTable>,
    state: Arc<RwLock<GatewayState>>,
    shutdown: RwLock<Option<CancellationToken>>,
    local_addr: RwLock<Option<SocketAddr>>,
    connections: Arc<AtomicUsize>,
}

impl Gateway {
    /// Create a gateway serving `handlers`
    pub fn new(config: GatewayConfig, handlers: Arc<HandlerTable>) -> Self {
        Self {
            config,
            handlers,
            state: Arc::new(RwLock::new(GatewayState::Stopped)),
            shutdown: RwLock::new(None),
            local_addr: RwLock::new(None),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get current state
    pub async fn state(&self) -> GatewayState {
        *self.state.read().await
    }

    /// Get configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Handler table frames are dispatched to
    pub fn handlers(&self) -> &Arc<HandlerTable> {
        &self.handlers
    }

    /// Address the server is bound to, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    /// Number of open reverse connections
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Current status
    pub async fn status(&self) -> GatewayStatus {
        GatewayStatus {
            state: self.state().await,
            version: env!("CARGO_PKG_VERSION").to_string(),
            address: self.local_addr().await.map(|a| a.to_string()),
            connections: self.connection_count(),
            paths: self.handlers.paths().await,
        }
    }

    /// Bind the server, dial upstreams, and return the bound address.
    ///
    /// Port 0 binds an ephemeral port.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut state = self.state.write().await;
        if *state != GatewayState::Stopped {
            return Err(Error::Gateway("Gateway already running".to_string()));
        }
        *state = GatewayState::Starting;
        drop(state);

        tracing::info!("Starting Tasker Gateway");

        let bind = format!("{}:{}", self.config.host, self.config.port);
        let listener = match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.write().await = GatewayState::Stopped;
                return Err(Error::Gateway(format!("Failed to bind to {}: {}", bind, e)));
            }
        };
        let addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let router = router(ServerState {
            handlers: self.handlers.clone(),
            shutdown: shutdown.clone(),
            connections: self.connections.clone(),
        });

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!("Gateway server error: {}", e);
            }
        });

        for upstream in &self.config.upstream {
            client::spawn(upstream.clone(), self.handlers.clone(), shutdown.child_token());
        }

        *self.shutdown.write().await = Some(shutdown);
        *self.local_addr.write().await = Some(addr);
        *self.state.write().await = GatewayState::Running;

        tracing::info!("Tasker Gateway started on {}", addr);

        Ok(addr)
    }

    /// Stop the gateway and close every connection it owns
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != GatewayState::Running {
            return Ok(());
        }
        *state = GatewayState::ShuttingDown;
        drop(state);

        tracing::info!("Stopping Tasker Gateway");

        if let Some(shutdown) = self.shutdown.write().await.take() {
            shutdown.cancel();
        }
        *self.local_addr.write().await = None;
        *self.state.write().await = GatewayState::Stopped;

        tracing::info!("Tasker Gateway stopped");

        Ok(())
    }
}

/// Builder for Gateway
pub struct GatewayBuilder {
    config: GatewayConfig,
    handlers: Option<Arc<HandlerTable>>,
}

impl GatewayBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            handlers: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the gateway host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the gateway port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Add a forward connection
    pub fn upstream(mut self, url: impl Into<String>, path: impl Into<String>) -> Self {
        self.config.upstream.push(UpstreamConfig {
            url: url.into(),
            path: path.into(),
        });
        self
    }

    /// Share an existing handler table
    pub fn handlers(mut self, handlers: Arc<HandlerTable>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Build the gateway
    pub fn build(self) -> Gateway {
        let handlers = self.handlers.unwrap_or_default();
        Gateway::new(self.config, handlers)
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/:path", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.connections.load(Ordering::SeqCst),
        "paths": state.handlers.paths().await,
    }))
}

/// Accept a reverse connection on a registered adapter path
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(path): Path<String>,
    State(state): State<ServerState>,
) -> Response {
    if !state.handlers.contains(&path).await {
        tracing::warn!(path = %path, "Rejected connection to unknown path");
        return (StatusCode::NOT_FOUND, format!("No adapter at /{}", path)).into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, path, state))
}

async fn handle_socket(socket: WebSocket, path: String, state: ServerState) {
    let (transport, pump) = WsTransport::new(format!("{}-{}", path, uuid::Uuid::new_v4()));
    let (sink, stream) = socket.split();

    let sink = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));
    let stream = stream
        .take_while(|msg| future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text),
                Ok(Message::Binary(bytes)) => frame_text(bytes),
                _ => None,
            })
        });

    state.connections.fetch_add(1, Ordering::SeqCst);
    run_connection(
        &path,
        transport,
        pump,
        state.handlers.clone(),
        state.shutdown.clone(),
        sink,
        stream,
    )
    .await;
    state.connections.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gateway_creation() {
        let gateway = GatewayBuilder::new().host("127.0.0.1").port(18790).build();

        assert_eq!(gateway.state().await, GatewayState::Stopped);
        assert_eq!(gateway.config().port, 18790);
        assert!(gateway.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_gateway_lifecycle() {
        let gateway = GatewayBuilder::new().port(0).build();

        let addr = gateway.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(gateway.state().await, GatewayState::Running);
        assert!(gateway.start().await.is_err());

        gateway.stop().await.unwrap();
        assert_eq!(gateway.state().await, GatewayState::Stopped);
    }

    #[tokio::test]
    async fn test_bind_failure_resets_state() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let gateway = GatewayBuilder::new().port(port).build();

        let err = gateway.start().await.unwrap_err();
        assert_eq!(err.kind(), "GatewayError");
        assert_eq!(gateway.state().await, GatewayState::Stopped);
    }

    #[tokio::test]
    async fn test_status_lists_paths() {
        let handlers = Arc::new(HandlerTable::new());
        let gateway = GatewayBuilder::new().handlers(handlers).build();

        let status = gateway.status().await;
        assert_eq!(status.state, GatewayState::Stopped);
        assert!(status.paths.is_empty());
        assert_eq!(status.connections, 0);
    }
}

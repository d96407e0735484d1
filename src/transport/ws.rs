//! WebSocket-backed transport
//!
//! The transport itself is socket-agnostic: outbound frames go through an
//! unbounded queue and termination is a cancellation signal. The gateway
//! owns the actual socket and drives it from the [`WsPump`] half, which
//! lets the same transport serve both accepted (server-side) and dialed
//! (client-side) connections.

use super::Transport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Transport half handed to adapters
pub struct WsTransport {
    id: String,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

/// Socket half driven by the gateway
pub struct WsPump {
    /// Serialized frames waiting to be written to the socket
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Cancelled when the transport is terminated
    pub cancel: CancellationToken,
}

impl WsTransport {
    /// Create a transport and the pump that drives its socket
    pub fn new(id: impl Into<String>) -> (Arc<Self>, WsPump) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let transport = Arc::new(Self {
            id: id.into(),
            outbound: tx,
            cancel: cancel.clone(),
        });
        (
            transport,
            WsPump {
                outbound: rx,
                cancel,
            },
        )
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_frame(&self, frame: &Value) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Transport(format!("Connection {} is closed", self.id)));
        }
        let text = serde_json::to_string(frame)?;
        self.outbound
            .send(text)
            .map_err(|_| Error::Transport(format!("Connection {} is closed", self.id)))
    }

    fn terminate(&self) {
        tracing::debug!(connection = %self.id, "Terminating connection");
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

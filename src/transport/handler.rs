//! Per-path registry of inbound frame handlers

use super::Transport;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Callback invoked for every inbound frame on a path
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Handle one text frame received on `transport`
    async fn on_frame(&self, transport: Arc<dyn Transport>, frame: &str);
}

/// Registry of frame handlers keyed by connection path.
///
/// Registration appends: registering twice under the same path means every
/// frame on that path is delivered twice.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn FrameHandler>>>>,
}

impl HandlerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler under `path`
    pub async fn register(&self, path: &str, handler: Arc<dyn FrameHandler>) {
        self.handlers
            .write()
            .await
            .entry(path.to_string())
            .or_default()
            .push(handler);
    }

    /// Number of handlers registered under `path`
    pub async fn handler_count(&self, path: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(path)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Whether any handler is registered under `path`
    pub async fn contains(&self, path: &str) -> bool {
        self.handler_count(path).await > 0
    }

    /// All registered paths
    pub async fn paths(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }

    /// Remove every handler under `path`
    pub async fn remove(&self, path: &str) {
        self.handlers.write().await.remove(path);
    }

    /// Deliver `frame` to every handler under `path`, in registration
    /// order. Returns the number of handlers invoked.
    pub async fn dispatch(&self, path: &str, transport: Arc<dyn Transport>, frame: &str) -> usize {
        // Snapshot so handlers can register without deadlocking
        let handlers = match self.handlers.read().await.get(path) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };

        for handler in &handlers {
            handler.on_frame(transport.clone(), frame).await;
        }
        handlers.len()
    }
}

//! Adapter lifecycle and the host's adapter registry

use crate::error::{Error, Result};
use crate::transport::HandlerTable;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Adapter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Constructed, no handler installed
    Unregistered,
    /// Frame handler installed
    Loaded,
    /// At least one frame received
    Active,
    /// Torn down; terminal
    Destroyed,
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdapterState::Unregistered => "unregistered",
            AdapterState::Loaded => "loaded",
            AdapterState::Active => "active",
            AdapterState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// A platform adapter managed by the host
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter id
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Handler-table key the adapter listens on
    fn path(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> AdapterState;

    /// Install the adapter's frame handler.
    ///
    /// Each call appends another handler; call once per adapter.
    async fn load(self: Arc<Self>, handlers: &HandlerTable) -> Result<()>;

    /// Tear down the adapter
    async fn destroy(&self) -> Result<()>;
}

/// Ordered collection of adapters owned by the host process
pub struct AdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn Adapter>>>,
    handlers: Arc<HandlerTable>,
}

impl AdapterRegistry {
    /// Create a registry sharing `handlers` with the transport layer
    pub fn new(handlers: Arc<HandlerTable>) -> Self {
        Self {
            adapters: RwLock::new(Vec::new()),
            handlers,
        }
    }

    /// Handler table shared with the transport layer
    pub fn handlers(&self) -> &Arc<HandlerTable> {
        &self.handlers
    }

    /// Add an adapter. Ids must be unique.
    pub async fn register(&self, adapter: Arc<dyn Adapter>) -> Result<()> {
        if adapter.state() == AdapterState::Destroyed {
            return Err(Error::Adapter(format!(
                "Adapter {} is destroyed",
                adapter.id()
            )));
        }

        let mut adapters = self.adapters.write().await;
        if adapters.iter().any(|a| a.id() == adapter.id()) {
            return Err(Error::Adapter(format!(
                "Adapter {} already registered",
                adapter.id()
            )));
        }

        tracing::info!(adapter = %adapter.id(), path = %adapter.path(), "Adapter registered");
        adapters.push(adapter);
        Ok(())
    }

    /// Registered adapters, in registration order
    pub async fn adapters(&self) -> Vec<Arc<dyn Adapter>> {
        self.adapters.read().await.clone()
    }

    /// Look up an adapter by id
    pub async fn get(&self, id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters
            .read()
            .await
            .iter()
            .find(|a| a.id() == id)
            .cloned()
    }

    /// Load every adapter that has not been loaded yet
    pub async fn load_all(&self) -> Result<()> {
        for adapter in self.adapters().await {
            if adapter.state() == AdapterState::Unregistered {
                adapter.load(&self.handlers).await?;
            }
        }
        Ok(())
    }

    /// Destroy every adapter in reverse registration order and unregister
    /// their handlers. Errors are logged, not propagated, so one failing
    /// adapter cannot block the others.
    pub async fn destroy_all(&self) {
        let adapters: Vec<_> = self.adapters.write().await.drain(..).collect();
        for adapter in adapters.iter().rev() {
            if let Err(e) = adapter.destroy().await {
                tracing::error!(adapter = %adapter.id(), "Failed to destroy adapter: {}", e);
            }
            self.handlers.remove(adapter.path()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FrameHandler, Transport};
    use std::sync::Mutex;

    struct Dummy {
        id: String,
        state: Mutex<AdapterState>,
    }

    impl Dummy {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                state: Mutex::new(AdapterState::Unregistered),
            })
        }
    }

    #[async_trait]
    impl FrameHandler for Dummy {
        async fn on_frame(&self, _transport: Arc<dyn Transport>, _frame: &str) {}
    }

    #[async_trait]
    impl Adapter for Dummy {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            &self.id
        }

        fn path(&self) -> &str {
            &self.id
        }

        fn state(&self) -> AdapterState {
            *self.state.lock().unwrap()
        }

        async fn load(self: Arc<Self>, handlers: &HandlerTable) -> Result<()> {
            handlers.register(&self.id, self.clone()).await;
            *self.state.lock().unwrap() = AdapterState::Loaded;
            Ok(())
        }

        async fn destroy(&self) -> Result<()> {
            *self.state.lock().unwrap() = AdapterState::Destroyed;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_and_load() {
        let registry = AdapterRegistry::new(Arc::new(HandlerTable::new()));
        let adapter = Dummy::new("A");
        registry.register(adapter.clone()).await.unwrap();

        registry.load_all().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Loaded);
        assert_eq!(registry.handlers().handler_count("A").await, 1);

        // Already loaded adapters are skipped
        registry.load_all().await.unwrap();
        assert_eq!(registry.handlers().handler_count("A").await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = AdapterRegistry::new(Arc::new(HandlerTable::new()));
        registry.register(Dummy::new("A")).await.unwrap();

        let err = registry.register(Dummy::new("A")).await.unwrap_err();
        assert_eq!(err.kind(), "AdapterError");
    }

    #[tokio::test]
    async fn test_destroy_all() {
        let registry = AdapterRegistry::new(Arc::new(HandlerTable::new()));
        let a = Dummy::new("A");
        let b = Dummy::new("B");
        registry.register(a.clone()).await.unwrap();
        registry.register(b.clone()).await.unwrap();
        registry.load_all().await.unwrap();

        registry.destroy_all().await;

        assert_eq!(a.state(), AdapterState::Destroyed);
        assert_eq!(b.state(), AdapterState::Destroyed);
        assert!(registry.adapters().await.is_empty());
        assert!(registry.handlers().paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_destroyed_adapter_cannot_register() {
        let registry = AdapterRegistry::new(Arc::new(HandlerTable::new()));
        let adapter = Dummy::new("A");
        adapter.destroy().await.unwrap();

        assert!(registry.register(adapter).await.is_err());
    }
}

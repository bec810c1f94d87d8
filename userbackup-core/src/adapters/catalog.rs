//! Named connection catalogs.

use super::{DatabaseAdapter, create_adapter};
use crate::Result;
use crate::config::ConnectionSpec;
use crate::error::{UserBackupError, redact_database_url};
use async_trait::async_trait;
use std::sync::Arc;

/// The set of databases a sweep visits, in a stable order.
#[async_trait]
pub trait ConnectionCatalog: Send + Sync {
    /// Connection names in sweep order.
    fn list_connections(&self) -> Vec<String>;

    /// Returns the adapter for `name`.
    ///
    /// # Errors
    /// Returns a `Connection` error if the name is unknown or unreachable.
    async fn connection(&self, name: &str) -> Result<Arc<dyn DatabaseAdapter>>;
}

/// A catalog of adapters opened up front.
#[derive(Default)]
pub struct StaticCatalog {
    connections: Vec<(String, Arc<dyn DatabaseAdapter>)>,
}

impl std::fmt::Debug for StaticCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCatalog")
            .field("connections", &self.list_connections())
            .finish()
    }
}

impl StaticCatalog {
    /// Creates a catalog without connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to register an already opened adapter.
    ///
    /// Registering a name twice replaces the earlier adapter in place.
    pub fn with_adapter(mut self, name: impl Into<String>, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        let name = name.into();
        match self.connections.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = adapter,
            None => self.connections.push((name, adapter)),
        }
        self
    }

    /// Opens every connection in `specs`, in order.
    ///
    /// # Errors
    /// Fails on the first connection that cannot be opened.
    pub async fn connect(specs: &[ConnectionSpec]) -> Result<Self> {
        let mut catalog = Self::new();

        for spec in specs {
            tracing::debug!(
                "Opening connection '{}' ({})",
                spec.name,
                redact_database_url(&spec.url)
            );
            let adapter = create_adapter(&spec.url).await.map_err(|e| {
                tracing::error!("Failed to open connection '{}': {}", spec.name, e);
                e
            })?;
            catalog = catalog.with_adapter(spec.name.clone(), adapter);
        }

        Ok(catalog)
    }
}

#[async_trait]
impl ConnectionCatalog for StaticCatalog {
    fn list_connections(&self) -> Vec<String> {
        self.connections.iter().map(|(name, _)| name.clone()).collect()
    }

    async fn connection(&self, name: &str) -> Result<Arc<dyn DatabaseAdapter>> {
        self.connections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, adapter)| Arc::clone(adapter))
            .ok_or_else(|| {
                UserBackupError::connection_failed(
                    format!("Unknown connection '{}'", name),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "not in catalog"),
                )
            })
    }
}

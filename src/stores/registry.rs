//! Backend registry
//!
//! Maps the `state_store.backend` configuration key to a factory that opens a
//! [`StateStore`]. Built through [`StoreRegistryBuilder`]; `with_defaults()` registers
//! the bundled `memory` and `sqlite` backends.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::in_memory::InMemoryStateStore;
use super::sqlite::SqliteStateStore;
use super::{StateStore, StoreError, StoreOptions};

type OpenFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn StateStore>, StoreError>> + Send>>;

/// Opens a store from an optional connection url and the shared store options.
pub type StoreFactoryFn = Arc<dyn Fn(Option<String>, StoreOptions) -> OpenFuture + Send + Sync>;

/// Immutable map of backend name to factory.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    factories: Arc<BTreeMap<String, StoreFactoryFn>>,
}

/// Builder for [`StoreRegistry`]. Duplicate registrations are collected and reported by `build`.
pub struct StoreRegistryBuilder {
    factories: BTreeMap<String, StoreFactoryFn>,
    errors: Vec<String>,
}

impl StoreRegistry {
    pub fn builder() -> StoreRegistryBuilder {
        StoreRegistryBuilder {
            factories: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// Registry with the `memory` and `sqlite` backends.
    pub fn with_defaults() -> Self {
        // the bundled names are distinct, so build cannot fail
        Self::builder().register_defaults().build().unwrap_or_default()
    }

    pub fn contains(&self, backend: &str) -> bool {
        self.factories.contains_key(backend)
    }

    pub fn backends(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Open a store for `backend`. An unregistered name is a permanent error.
    pub async fn open(
        &self,
        backend: &str,
        url: Option<&str>,
        options: StoreOptions,
    ) -> Result<Arc<dyn StateStore>, StoreError> {
        let Some(factory) = self.factories.get(backend) else {
            return Err(StoreError::permanent(
                "open",
                format!(
                    "unknown state store backend '{backend}' (registered: {})",
                    self.backends().join(", ")
                ),
            ));
        };
        tracing::debug!(target: "orderflow::stores", backend = %backend, "Opening state store");
        factory(url.map(str::to_string), options).await
    }
}

impl StoreRegistryBuilder {
    pub fn register<F, Fut>(mut self, backend: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<String>, StoreOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn StateStore>, StoreError>> + Send + 'static,
    {
        let backend = backend.into();
        if self.factories.contains_key(&backend) {
            self.errors.push(format!("duplicate state store backend '{backend}'"));
            return self;
        }
        let factory: StoreFactoryFn = Arc::new(move |url, options| Box::pin(f(url, options)));
        self.factories.insert(backend, factory);
        self
    }

    pub fn register_defaults(self) -> Self {
        self.register("memory", |_url, options| async move {
            Ok(Arc::new(InMemoryStateStore::new(options)) as Arc<dyn StateStore>)
        })
        .register("sqlite", |url, options| async move {
            let url = url.unwrap_or_else(|| "sqlite::memory:".to_string());
            let store = SqliteStateStore::new(&url, options).await?;
            Ok(Arc::new(store) as Arc<dyn StateStore>)
        })
    }

    pub fn build(self) -> Result<StoreRegistry, String> {
        if !self.errors.is_empty() {
            return Err(self.errors.join("; "));
        }
        Ok(StoreRegistry {
            factories: Arc::new(self.factories),
        })
    }
}

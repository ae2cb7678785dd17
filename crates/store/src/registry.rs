//! Storage handler lookup by name

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};
use upaas_config::StorageConfig;
use upaas_errors::{ConfigError, Error};

use crate::{LocalStorage, MongoDbStorage, Storage};

/// Constructor of a backend from its handler settings
pub type StorageFactory = fn(&serde_json::Value) -> Result<Arc<dyn Storage>, Error>;

/// Mapping from handler name to backend constructor
#[derive(Debug, Clone)]
pub struct StorageRegistry {
    handlers: BTreeMap<String, StorageFactory>,
}

impl Default for StorageRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(LocalStorage::NAME, |settings| {
            Ok(Arc::new(LocalStorage::from_settings(settings)?))
        });
        registry.register(MongoDbStorage::NAME, |settings| {
            Ok(Arc::new(MongoDbStorage::from_settings(settings)?))
        });
        registry
    }
}

impl StorageRegistry {
    /// Registry with the built-in `local` and `mongodb` handlers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry without any handler
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Add or replace a handler
    pub fn register(&mut self, name: impl Into<String>, factory: StorageFactory) {
        self.handlers.insert(name.into(), factory);
    }

    /// Registered handler names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Instantiate the handler `name` with `settings`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownStorageHandler` if no handler is
    /// registered under `name`, and `ConfigError::InvalidStorageSettings`
    /// if the handler rejects the settings.
    pub fn create(&self, name: &str, settings: &serde_json::Value) -> Result<Arc<dyn Storage>, Error> {
        let Some(factory) = self.handlers.get(name) else {
            error!(handler = name, "storage handler could not be loaded");
            return Err(ConfigError::UnknownStorageHandler {
                name: name.to_string(),
            }
            .into());
        };
        match factory(settings) {
            Ok(storage) => {
                info!(handler = name, "loaded storage handler");
                Ok(storage)
            }
            Err(Error::Config(e)) => {
                error!(handler = name, error = %e, "storage handler failed to initialize with given configuration");
                Err(e.into())
            }
            Err(e) => {
                error!(handler = name, error = %e, "storage handler failed to initialize with given configuration");
                Err(ConfigError::InvalidStorageSettings {
                    handler: name.to_string(),
                    message: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Instantiate the handler named in the `[storage]` configuration section
    ///
    /// # Errors
    ///
    /// See [`StorageRegistry::create`].
    pub fn for_config(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>, Error> {
        self.create(&config.handler, &config.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_handlers() {
        let registry = StorageRegistry::new();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["local", "mongodb"]);
        let storage = registry
            .create("mongodb", &serde_json::json!({ "database": "packages" }))
            .unwrap();
        assert_eq!(storage.name(), "mongodb");
    }

    #[test]
    fn unknown_handler() {
        let err = StorageRegistry::new()
            .create("upaas.storage.s3.S3Storage", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::UnknownStorageHandler { .. })
        ));
    }

    #[test]
    fn empty_registry_knows_nothing() {
        assert!(StorageRegistry::empty().create("local", &serde_json::json!({})).is_err());
    }
}

/// Adapter construction keyed by backend type
use crate::adapter::memory::{MemoryCache, MemoryQueue};
use crate::adapter::redis::RedisAdapter;
use crate::adapter::AdapterHandle;
use crate::config::ServiceConfig;
use crate::error::{ThroomError, ThroomResult};
use std::collections::HashMap;
use std::fmt;

/// Builds a ready-to-connect handle; must not open any connection itself
pub type AdapterConstructor = Box<dyn Fn(&ServiceConfig) -> ThroomResult<AdapterHandle> + Send + Sync>;

/// Maps backend type identifiers to constructors
#[derive(Default)]
pub struct AdapterFactory {
    constructors: HashMap<String, AdapterConstructor>,
}

impl AdapterFactory {
    /// Empty factory; external wiring registers every backend type
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory pre-loaded with the backends this crate ships
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        factory.register("redis", |config| {
            Ok(AdapterHandle::cache(RedisAdapter::new(config.clone())))
        });
        factory.register("memory_cache", |config| {
            Ok(AdapterHandle::cache(MemoryCache::new(config.clone())))
        });
        factory.register("memory_queue", |config| {
            Ok(AdapterHandle::queue(MemoryQueue::new(config.clone())))
        });
        factory
    }

    /// Associate `service_type` with `constructor`, replacing any previous one
    pub fn register<S, F>(&mut self, service_type: S, constructor: F)
    where
        S: Into<String>,
        F: Fn(&ServiceConfig) -> ThroomResult<AdapterHandle> + Send + Sync + 'static,
    {
        let service_type = service_type.into();
        tracing::debug!("Registered adapter constructor for type {}", service_type);
        self.constructors.insert(service_type, Box::new(constructor));
    }

    /// Build the handle for `config.service_type`
    pub fn create(&self, config: &ServiceConfig) -> ThroomResult<AdapterHandle> {
        let constructor = self
            .constructors
            .get(&config.service_type)
            .ok_or_else(|| ThroomError::adapter_type_not_registered(&config.service_type))?;

        constructor(config)
    }

    pub fn is_registered(&self, service_type: &str) -> bool {
        self.constructors.contains_key(service_type)
    }

    /// Registered type names, sorted
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for AdapterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterFactory")
            .field("types", &self.registered_types())
            .finish()
    }
}

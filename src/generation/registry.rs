//! Backend Registry & Selector
//!
//! Holds the configured backends and fixes their try-order once at build
//! time. With `prefer_local`, local backends come first and the rest keep
//! registration order; otherwise registration order is used as-is.

use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::backend::{
    BackendConfig, BackendKind, ComfyUiBackend, GenerationBackend, ReplicateBackend,
    ReplicateModel, SharedBackend,
};
use crate::config::Config;
use crate::types::{ForgeError, Result};

/// Configured backends in their fixed try-order
#[derive(Clone)]
pub struct BackendRegistry {
    /// Registration order
    backends: Vec<SharedBackend>,
    /// Try-order, computed once
    order: Vec<SharedBackend>,
    prefer_local: bool,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("order", &self.names())
            .field("prefer_local", &self.prefer_local)
            .finish()
    }
}

impl BackendRegistry {
    pub fn builder() -> BackendRegistryBuilder {
        BackendRegistryBuilder::new()
    }

    /// Build backends from configuration
    ///
    /// A backend that fails to initialize is logged and left out. Having no
    /// backend at all is a configuration error.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::builder().prefer_local(config.dispatch.prefer_local);

        if config.local.enabled {
            let backend_config = BackendConfig::new(
                "local",
                config.local.cost_per_image,
                Duration::from_secs(config.local.timeout_secs),
            );
            match ComfyUiBackend::with_config(&config.local.url, &config.local.model, backend_config)
            {
                Ok(backend) => builder = builder.add_backend(backend),
                Err(e) => warn!(backend = "local", error = %e, "Could not initialize backend"),
            }
        }

        if config.replicate.enabled
            && let Some(token) = config.replicate.resolve_token()
        {
            let backend = ReplicateModel::lookup(&config.replicate.model).and_then(|model| {
                let backend_config = BackendConfig::new(
                    "replicate",
                    model.cost,
                    Duration::from_secs(config.replicate.timeout_secs),
                );
                ReplicateBackend::with_config(
                    Some(SecretString::from(token)),
                    &config.replicate.model,
                    backend_config,
                )
            });
            match backend {
                Ok(backend) => builder = builder.add_backend(backend),
                Err(e) => warn!(backend = "replicate", error = %e, "Could not initialize backend"),
            }
        }

        builder.build()
    }

    /// Backends in try-order
    pub fn backend_order(&self) -> &[SharedBackend] {
        &self.order
    }

    /// Backends in registration order
    pub fn backends(&self) -> &[SharedBackend] {
        &self.backends
    }

    /// Names in try-order
    pub fn names(&self) -> Vec<String> {
        self.order.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&SharedBackend> {
        self.backends.iter().find(|b| b.name() == name)
    }

    pub fn primary(&self) -> &SharedBackend {
        // build() guarantees at least one backend
        &self.order[0]
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn prefers_local(&self) -> bool {
        self.prefer_local
    }
}

/// Builder for [`BackendRegistry`]
pub struct BackendRegistryBuilder {
    backends: Vec<SharedBackend>,
    prefer_local: bool,
}

impl BackendRegistryBuilder {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            prefer_local: true,
        }
    }

    pub fn add_backend(mut self, backend: impl GenerationBackend + 'static) -> Self {
        self.backends.push(Arc::new(backend));
        self
    }

    pub fn add_shared(mut self, backend: SharedBackend) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn prefer_local(mut self, prefer_local: bool) -> Self {
        self.prefer_local = prefer_local;
        self
    }

    pub fn build(self) -> Result<BackendRegistry> {
        if self.backends.is_empty() {
            return Err(ForgeError::Config(
                "No backends available. Enable the local backend or provide a Replicate token"
                    .to_string(),
            ));
        }

        for (i, backend) in self.backends.iter().enumerate() {
            if self.backends[..i].iter().any(|b| b.name() == backend.name()) {
                return Err(ForgeError::Config(format!(
                    "Duplicate backend name: {}",
                    backend.name()
                )));
            }
        }

        let order = if self.prefer_local {
            let (mut local, remote): (Vec<_>, Vec<_>) = self
                .backends
                .iter()
                .cloned()
                .partition(|b| b.kind() == BackendKind::Local);
            local.extend(remote);
            local
        } else {
            self.backends.clone()
        };

        let registry = BackendRegistry {
            backends: self.backends,
            order,
            prefer_local: self.prefer_local,
        };
        info!(order = ?registry.names(), "Backend registry ready");
        Ok(registry)
    }
}

impl Default for BackendRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::backend::mock::MockBackend;

    #[test]
    fn test_empty_registry_is_config_error() {
        let err = BackendRegistry::builder().build().unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }

    #[test]
    fn test_prefer_local_order() {
        let registry = BackendRegistry::builder()
            .add_backend(MockBackend::new("replicate", 0.003))
            .add_backend(MockBackend::new("local", 0.0002).local())
            .add_backend(MockBackend::new("other", 0.01))
            .prefer_local(true)
            .build()
            .unwrap();

        assert_eq!(registry.names(), vec!["local", "replicate", "other"]);
        assert_eq!(registry.primary().name(), "local");
    }

    #[test]
    fn test_registration_order_without_preference() {
        let registry = BackendRegistry::builder()
            .add_backend(MockBackend::new("replicate", 0.003))
            .add_backend(MockBackend::new("local", 0.0002).local())
            .prefer_local(false)
            .build()
            .unwrap();

        assert_eq!(registry.names(), vec!["replicate", "local"]);
    }

    #[test]
    fn test_order_is_stable() {
        let registry = BackendRegistry::builder()
            .add_backend(MockBackend::new("a", 0.1))
            .add_backend(MockBackend::new("b", 0.1).local())
            .build()
            .unwrap();
        assert_eq!(registry.names(), registry.names());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = BackendRegistry::builder()
            .add_backend(MockBackend::new("local", 0.0))
            .add_backend(MockBackend::new("local", 0.0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_local_only() {
        let mut config = Config::default();
        config.replicate.enabled = false;

        let registry = BackendRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["local"]);
        assert_eq!(registry.primary().cost(), 0.0002);
    }

    #[test]
    fn test_from_config_bad_local_model_omitted() {
        let mut config = Config::default();
        config.local.model = "unknown-model".to_string();
        config.replicate.enabled = true;
        config.replicate.api_token = Some("r8_test".to_string());

        let registry = BackendRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["replicate"]);
    }

    #[test]
    fn test_from_config_nothing_usable() {
        let mut config = Config::default();
        config.local.enabled = false;
        config.replicate.enabled = false;

        assert!(matches!(
            BackendRegistry::from_config(&config),
            Err(ForgeError::Config(_))
        ));
    }
}

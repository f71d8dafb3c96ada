//! Precache manifest: the generation tag plus the resources it must hold.

use nimbus_common::CacheConfig;
use url::Url;

use crate::ServiceWorkerError;

/// What one cache generation consists of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheManifest {
    cache_name: String,
    resources: Vec<String>,
    fallback: String,
}

impl PrecacheManifest {
    /// Build a manifest.
    ///
    /// The fallback page must be one of the precached resources, otherwise a
    /// network failure could not be answered.
    pub fn new(
        cache_name: impl Into<String>,
        resources: impl IntoIterator<Item = impl Into<String>>,
        fallback: impl Into<String>,
    ) -> Result<Self, ServiceWorkerError> {
        let cache_name = cache_name.into();
        let resources: Vec<String> = resources.into_iter().map(Into::into).collect();
        let fallback = fallback.into();

        if cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::InvalidManifest(
                "cache name is empty".to_string(),
            ));
        }
        if resources.is_empty() {
            return Err(ServiceWorkerError::InvalidManifest(
                "precache set is empty".to_string(),
            ));
        }
        if !resources.contains(&fallback) {
            return Err(ServiceWorkerError::InvalidManifest(format!(
                "fallback '{}' is not precached",
                fallback
            )));
        }

        Ok(Self {
            cache_name,
            resources,
            fallback,
        })
    }

    /// Build from the `cache` section of the configuration.
    pub fn from_config(config: &CacheConfig) -> Result<Self, ServiceWorkerError> {
        Self::new(
            config.name.as_str(),
            config.precache.iter().map(String::as_str),
            config.fallback.as_str(),
        )
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Resolve every resource against the worker scope, in order.
    pub fn resource_urls(&self, scope: &Url) -> Result<Vec<Url>, ServiceWorkerError> {
        self.resources
            .iter()
            .map(|resource| resolve(scope, resource))
            .collect()
    }

    /// Resolve the fallback page against the worker scope.
    pub fn fallback_url(&self, scope: &Url) -> Result<Url, ServiceWorkerError> {
        resolve(scope, &self.fallback)
    }
}

fn resolve(scope: &Url, resource: &str) -> Result<Url, ServiceWorkerError> {
    scope
        .join(resource)
        .map_err(|e| ServiceWorkerError::InvalidManifest(format!("{}: {}", resource, e)))
}

//! Nimbus configuration
//!
//! Loaded from an optional JSON file, then overridden from `NIMBUS_*`
//! environment variables, then validated.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

use crate::{NimbusError, Result};

/// Environment variable overriding the cache generation tag.
pub const ENV_CACHE_NAME: &str = "NIMBUS_CACHE_NAME";
/// Environment variable overriding the worker scope URL.
pub const ENV_SCOPE: &str = "NIMBUS_SCOPE";
/// Environment variable overriding the cache storage directory.
pub const ENV_STORAGE_DIR: &str = "NIMBUS_STORAGE_DIR";
/// Environment variable overriding the connectivity probe URL.
pub const ENV_PROBE_URL: &str = "NIMBUS_PROBE_URL";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NimbusConfig {
    /// Offline cache settings
    pub cache: CacheConfig,

    /// Canonical page names
    pub pages: PagesConfig,

    /// Network settings
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Generation tag; changing it invalidates every older bucket
    pub name: String,

    /// Resources fetched at install, relative to the scope
    pub precache: Vec<String>,

    /// Precached page served when the network is unreachable
    pub fallback: String,

    /// Directory holding one JSON file per bucket
    pub storage_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagesConfig {
    /// Page shown while online
    pub online: String,

    /// Page shown while offline
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Worker scope; precache entries resolve against it
    pub scope: Url,

    /// User agent string
    pub user_agent: String,

    /// URL probed to detect connectivity, `None` probes the scope
    pub probe_url: Option<Url>,

    /// Probe interval in milliseconds
    pub probe_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "v1".to_string(),
            precache: vec!["fallback.html".to_string(), "fallback-js.js".to_string()],
            fallback: "fallback.html".to_string(),
            storage_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nimbus"),
        }
    }
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            online: "index.html".to_string(),
            fallback: "fallback.html".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            scope: Url::parse("http://localhost:8080/src/").expect("static scope URL is valid"),
            user_agent: format!("Nimbus/{}", env!("CARGO_PKG_VERSION")),
            probe_url: None,
            probe_interval_ms: 5_000,
        }
    }
}

impl NetworkConfig {
    /// URL used by the connectivity monitor.
    pub fn probe_url(&self) -> &Url {
        self.probe_url.as_ref().unwrap_or(&self.scope)
    }
}

/// Whether `name` can stand as a single URL path segment.
///
/// Page names are matched against the last segment of a location and joined
/// onto it, so separators, query and fragment markers and dot segments are
/// rejected.
pub fn is_page_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '?', '#'])
}

impl NimbusConfig {
    /// Load configuration from `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Reading configuration");
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply overrides from a key lookup (normally the environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(name) = lookup(ENV_CACHE_NAME) {
            self.cache.name = name;
        }
        if let Some(scope) = lookup(ENV_SCOPE) {
            self.network.scope = Url::parse(&scope)?;
        }
        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            self.cache.storage_dir = PathBuf::from(dir);
        }
        if let Some(probe) = lookup(ENV_PROBE_URL) {
            self.network.probe_url = Some(Url::parse(&probe)?);
        }
        Ok(())
    }

    /// Check invariants the offline subsystem relies on.
    pub fn validate(&self) -> Result<()> {
        if self.cache.name.trim().is_empty() {
            return Err(NimbusError::config("cache name must not be empty"));
        }
        if self.cache.precache.is_empty() {
            return Err(NimbusError::config("precache list must not be empty"));
        }
        if !self.cache.precache.contains(&self.cache.fallback) {
            return Err(NimbusError::config(format!(
                "fallback page '{}' is not in the precache list",
                self.cache.fallback
            )));
        }
        for page in [&self.pages.online, &self.pages.fallback] {
            if !is_page_name(page) {
                return Err(NimbusError::config(format!(
                    "page name '{}' is not a single path segment",
                    page
                )));
            }
        }
        if self.pages.online == self.pages.fallback {
            return Err(NimbusError::config(
                "online and fallback pages must differ",
            ));
        }
        if self.network.probe_interval_ms == 0 {
            return Err(NimbusError::config("probe interval must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = NimbusConfig::default();
        assert_eq!(config.cache.name, "v1");
        assert_eq!(config.cache.precache, vec!["fallback.html", "fallback-js.js"]);
        assert_eq!(config.pages.online, "index.html");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fallback_must_be_precached() {
        let mut config = NimbusConfig::default();
        config.cache.fallback = "offline.html".to_string();
        assert!(matches!(config.validate(), Err(NimbusError::Config(_))));
    }

    #[test]
    fn test_page_names_are_single_segments() {
        assert!(is_page_name("index.html"));
        assert!(is_page_name("my weather.html"));
        for bad in ["", ".", "..", "src/index.html", "a\\b.html", "index.html?x", "index.html#top"] {
            assert!(!is_page_name(bad), "{bad:?}");
        }

        let mut config = NimbusConfig::default();
        config.pages.fallback = "src/fallback.html".to_string();
        assert!(matches!(config.validate(), Err(NimbusError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_CACHE_NAME, "v2"),
            (ENV_SCOPE, "https://weather.example/app/"),
            (ENV_STORAGE_DIR, "/tmp/nimbus-test"),
        ]
        .into_iter()
        .collect();

        let mut config = NimbusConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.cache.name, "v2");
        assert_eq!(config.network.scope.as_str(), "https://weather.example/app/");
        assert_eq!(config.cache.storage_dir, PathBuf::from("/tmp/nimbus-test"));
        assert_eq!(config.network.probe_url().as_str(), "https://weather.example/app/");
    }

    #[test]
    fn test_bad_scope_override() {
        let mut config = NimbusConfig::default();
        let result = config.apply_overrides(|key| {
            (key == ENV_SCOPE).then(|| "not a url".to_string())
        });
        assert!(matches!(result, Err(NimbusError::Url(_))));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nimbus.json");
        std::fs::write(&path, r#"{ "cache": { "name": "v7" } }"#).unwrap();

        let config = NimbusConfig::from_file(&path).unwrap();
        assert_eq!(config.cache.name, "v7");
        assert_eq!(config.cache.fallback, "fallback.html");
        assert_eq!(config.pages, PagesConfig::default());
    }
}

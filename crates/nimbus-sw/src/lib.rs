//! # Nimbus Service Worker
//!
//! Offline cache manager for the weather page.
//!
//! ## Features
//!
//! - **Precache**: all-or-nothing install of a fixed resource set
//! - **Generations**: one named bucket per version tag, stale buckets evicted
//!   on activate
//! - **Fetch Interception**: cache hit, then network, then the fallback page
//!
//! ## Architecture
//!
//! ```text
//! OfflineCacheManager
//!     │
//!     ├── Registration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker) ── generation "v1"
//!     │
//!     ├── CacheStore (memory or JSON files)
//!     │       └── Cache "v1"
//!     │               └── URL → CacheEntry
//!     │
//!     └── Fetcher (network)
//! ```

use thiserror::Error;

pub mod cache;
pub mod manager;
pub mod manifest;
pub mod store;
pub mod worker;

pub use cache::{cache_key, Cache, CacheEntry, CacheStorage, FetchResponse, ResponseSource};
pub use manager::{FetchEvent, OfflineCacheManager};
pub use manifest::PrecacheManifest;
pub use store::{CacheStore, FileCacheStore, MemoryCacheStore};
pub use worker::{
    Registration, RegistrationStatus, ServiceWorker, ServiceWorkerId, ServiceWorkerState,
    WorkerStatus,
};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Activation failed: {0}")]
    ActivationFailed(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Fallback page not cached: {0}")]
    FallbackMissing(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

// ==================== Events ====================

/// Lifecycle events published by the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceWorkerEvent {
    /// A worker moved to a new state.
    StateChange {
        worker_id: ServiceWorkerId,
        generation: String,
        new_state: ServiceWorkerState,
    },
    /// An install attempt was rejected.
    InstallFailed { generation: String, reason: String },
    /// A stale bucket was deleted during activation.
    CacheEvicted { name: String },
    /// The network failed and the fallback page was served instead.
    FallbackServed {
        url: String,
        navigation: bool,
        client_id: Option<String>,
    },
}

//! Worker lifecycle and the registration that tracks installing, waiting and
//! active workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use url::Url;

use crate::manifest::PrecacheManifest;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Precaching.
    Installing,
    /// Precache complete, waiting for activation.
    Installed,
    /// Evicting stale generations.
    Activating,
    /// Intercepting fetches.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

impl ServiceWorkerState {
    /// Only an activated worker intercepts fetches.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, ServiceWorkerState::Activated)
    }
}

impl std::fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

// ==================== Service Worker ====================

/// A worker bound to one cache generation.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// What this worker precaches.
    pub manifest: Arc<PrecacheManifest>,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Why the worker became redundant, if it failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(manifest: Arc<PrecacheManifest>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            manifest,
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Cache generation owned by this worker.
    pub fn generation(&self) -> &str {
        self.manifest.cache_name()
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            id: self.id,
            generation: self.generation().to_string(),
            state: self.state,
        }
    }
}

// ==================== Registration ====================

/// Installing, waiting and active workers for one scope.
#[derive(Debug)]
pub struct Registration {
    /// Scope URL; precache resources resolve against it.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl Registration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Start installing a new worker.
    pub fn begin_install(&mut self, manifest: Arc<PrecacheManifest>) -> &ServiceWorker {
        let mut worker = ServiceWorker::new(manifest);
        worker.set_state(ServiceWorkerState::Installing);
        self.installing.insert(worker)
    }

    /// Transition installing to waiting. A previous waiting worker is
    /// superseded.
    pub fn install_complete(&mut self) -> Option<&ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        if let Some(mut old) = self.waiting.replace(worker) {
            old.set_state(ServiceWorkerState::Redundant);
        }
        self.waiting.as_ref()
    }

    /// Discard the installing worker. The active worker is untouched.
    pub fn install_failed(&mut self, reason: impl Into<String>) -> Option<ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.error = Some(reason.into());
        worker.set_state(ServiceWorkerState::Redundant);
        Some(worker)
    }

    /// Promote the waiting worker; the old active worker becomes redundant.
    pub fn activate(&mut self) -> Option<&ServiceWorker> {
        let mut worker = self.waiting.take()?;
        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
        }
        worker.set_state(ServiceWorkerState::Activated);
        self.active = Some(worker);
        self.active.as_ref()
    }

    /// Put a worker straight into the active slot.
    pub fn adopt_active(&mut self, manifest: Arc<PrecacheManifest>) -> &ServiceWorker {
        let mut worker = ServiceWorker::new(manifest);
        worker.set_state(ServiceWorkerState::Activated);
        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
        }
        self.active.insert(worker)
    }

    /// Active worker, if it can intercept fetches.
    pub fn controller(&self) -> Option<&ServiceWorker> {
        self.active
            .as_ref()
            .filter(|worker| worker.state.can_intercept_fetch())
    }

    /// Snapshot for reporting.
    pub fn status(&self) -> RegistrationStatus {
        RegistrationStatus {
            scope: self.scope.to_string(),
            installing: self.installing.as_ref().map(ServiceWorker::status),
            waiting: self.waiting.as_ref().map(ServiceWorker::status),
            active: self.active.as_ref().map(ServiceWorker::status),
        }
    }
}

/// Reported state of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub id: ServiceWorkerId,
    pub generation: String,
    pub state: ServiceWorkerState,
}

/// Reported state of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationStatus {
    pub scope: String,
    pub installing: Option<WorkerStatus>,
    pub waiting: Option<WorkerStatus>,
    pub active: Option<WorkerStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> Arc<PrecacheManifest> {
        Arc::new(PrecacheManifest::new(name, ["fallback.html"], "fallback.html").unwrap())
    }

    fn registration() -> Registration {
        Registration::new(Url::parse("https://example.com/src/").unwrap())
    }

    #[test]
    fn test_service_worker_creation() {
        let worker = ServiceWorker::new(manifest("v1"));
        assert_eq!(worker.generation(), "v1");
        assert_eq!(worker.state, ServiceWorkerState::Parsed);
        assert!(!worker.is_active());
    }

    #[test]
    fn test_only_activated_intercepts() {
        assert!(ServiceWorkerState::Activated.can_intercept_fetch());
        assert!(!ServiceWorkerState::Installed.can_intercept_fetch());
        assert!(!ServiceWorkerState::Activating.can_intercept_fetch());
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut registration = registration();

        registration.begin_install(manifest("v1"));
        assert_eq!(
            registration.installing.as_ref().unwrap().state,
            ServiceWorkerState::Installing
        );

        // Installing -> Installed
        registration.install_complete();
        assert!(registration.installing.is_none());
        assert_eq!(
            registration.waiting.as_ref().unwrap().state,
            ServiceWorkerState::Installed
        );
        assert!(registration.controller().is_none());

        // Installed -> Activated
        registration.activate();
        assert!(registration.waiting.is_none());
        assert_eq!(registration.controller().unwrap().generation(), "v1");
    }

    #[test]
    fn test_failed_install_keeps_active() {
        let mut registration = registration();
        registration.adopt_active(manifest("v1"));

        registration.begin_install(manifest("v2"));
        let failed = registration.install_failed("offline").unwrap();

        assert!(failed.is_redundant());
        assert_eq!(failed.error.as_deref(), Some("offline"));
        assert!(registration.installing.is_none());
        assert_eq!(registration.controller().unwrap().generation(), "v1");
    }

    #[test]
    fn test_activate_without_waiting() {
        let mut registration = registration();
        assert!(registration.activate().is_none());
    }

    #[test]
    fn test_status_snapshot() {
        let mut registration = registration();
        registration.adopt_active(manifest("v1"));
        registration.begin_install(manifest("v2"));

        let status = registration.status();
        assert_eq!(status.scope, "https://example.com/src/");
        assert_eq!(status.active.unwrap().generation, "v1");
        assert_eq!(status.installing.unwrap().state, ServiceWorkerState::Installing);
        assert!(status.waiting.is_none());
    }
}

//! Offline cache manager: install, activate and fetch handling.

use std::sync::Arc;

use futures::future::try_join_all;
use http::Method;
use nimbus_net::{Fetcher, Request};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{cache_key, CacheEntry, FetchResponse, ResponseSource};
use crate::manifest::PrecacheManifest;
use crate::store::CacheStore;
use crate::worker::{Registration, RegistrationStatus, ServiceWorkerId, ServiceWorkerState};
use crate::{ServiceWorkerError, ServiceWorkerEvent};

/// A fetch made by a controlled page.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The outgoing request.
    pub request: Request,

    /// Page that issued it, if known.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

/// Owns the cache generations for one scope and answers intercepted fetches.
pub struct OfflineCacheManager {
    registration: RwLock<Registration>,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl OfflineCacheManager {
    /// Create a manager for `scope`.
    pub fn new(
        scope: Url,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registration: RwLock::new(Registration::new(scope)),
                store,
                fetcher,
                event_tx,
            },
            event_rx,
        )
    }

    /// Snapshot of the worker slots.
    pub async fn status(&self) -> RegistrationStatus {
        self.registration.read().await.status()
    }

    /// Generation currently answering fetches.
    pub async fn active_generation(&self) -> Option<String> {
        self.registration
            .read()
            .await
            .controller()
            .map(|worker| worker.generation().to_string())
    }

    /// Precache `manifest` into its bucket and park the worker as waiting.
    ///
    /// Every resource is fetched before anything is written, so a failure
    /// leaves the bucket exactly as it was.
    #[instrument(skip(self, manifest), fields(generation = manifest.cache_name()))]
    pub async fn install(
        &self,
        manifest: PrecacheManifest,
    ) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let manifest = Arc::new(manifest);

        let (worker_id, scope) = {
            let mut registration = self.registration.write().await;
            if registration.installing.is_some() {
                return Err(ServiceWorkerError::StateError(
                    "another install is in progress".to_string(),
                ));
            }
            if registration
                .waiting
                .as_ref()
                .is_some_and(|worker| worker.state == ServiceWorkerState::Activating)
            {
                return Err(ServiceWorkerError::StateError(
                    "cannot install while a worker is activating".to_string(),
                ));
            }
            let scope = registration.scope.clone();
            (registration.begin_install(Arc::clone(&manifest)).id, scope)
        };
        self.emit_state(worker_id, &manifest, ServiceWorkerState::Installing);

        let result = self.precache(&manifest, &scope).await;

        let mut registration = self.registration.write().await;
        match result {
            Ok(count) => {
                registration.install_complete();
                drop(registration);
                info!(resources = count, "Install complete");
                self.emit_state(worker_id, &manifest, ServiceWorkerState::Installed);
                Ok(worker_id)
            }
            Err(err) => {
                registration.install_failed(err.to_string());
                drop(registration);
                warn!(error = %err, "Install failed");
                self.emit(ServiceWorkerEvent::InstallFailed {
                    generation: manifest.cache_name().to_string(),
                    reason: err.to_string(),
                });
                self.emit_state(worker_id, &manifest, ServiceWorkerState::Redundant);
                Err(err)
            }
        }
    }

    async fn precache(
        &self,
        manifest: &PrecacheManifest,
        scope: &Url,
    ) -> Result<usize, ServiceWorkerError> {
        let urls = manifest.resource_urls(scope)?;

        let staged = try_join_all(urls.into_iter().map(|url| self.fetch_for_precache(url))).await?;
        let count = staged.len();

        self.store
            .put_all(manifest.cache_name(), staged)
            .await
            .map_err(|e| ServiceWorkerError::InstallFailed(e.to_string()))?;

        Ok(count)
    }

    async fn fetch_for_precache(&self, url: Url) -> Result<CacheEntry, ServiceWorkerError> {
        let request = Request::get(url);
        let response = self.fetcher.fetch(&request).await.map_err(|e| {
            ServiceWorkerError::InstallFailed(format!("{}: {}", request.url, e))
        })?;

        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed(format!(
                "{}: status {}",
                request.url, response.status
            )));
        }

        debug!(url = %request.url, bytes = response.body.len(), "Precached");
        Ok(CacheEntry::from_response(&request, &response))
    }

    /// Evict every bucket but the waiting worker's and make it active.
    ///
    /// The bucket of an install still in flight is left alone. On failure the
    /// worker stays waiting and may be activated again.
    #[instrument(skip(self))]
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        let (worker_id, manifest, installing) = {
            let mut registration = self.registration.write().await;
            let installing = registration
                .installing
                .as_ref()
                .map(|worker| worker.generation().to_string());
            let worker = registration.waiting.as_mut().ok_or_else(|| {
                ServiceWorkerError::StateError("no installed worker is waiting".to_string())
            })?;
            if worker.state == ServiceWorkerState::Activating {
                return Err(ServiceWorkerError::StateError(
                    "activation already in progress".to_string(),
                ));
            }
            worker.set_state(ServiceWorkerState::Activating);
            (worker.id, Arc::clone(&worker.manifest), installing)
        };
        self.emit_state(worker_id, &manifest, ServiceWorkerState::Activating);

        let mut keep = vec![manifest.cache_name()];
        keep.extend(installing.as_deref());
        let result = self.evict_stale(&keep).await;

        let mut registration = self.registration.write().await;
        let still_waiting = registration
            .waiting
            .as_ref()
            .is_some_and(|worker| worker.id == worker_id);
        if !still_waiting {
            return Err(ServiceWorkerError::StateError(
                "waiting worker was replaced during activation".to_string(),
            ));
        }

        match result {
            Ok(evicted) => {
                registration.activate();
                drop(registration);
                info!(evicted, "Worker activated");
                self.emit_state(worker_id, &manifest, ServiceWorkerState::Activated);
                Ok(())
            }
            Err(err) => {
                if let Some(worker) = registration.waiting.as_mut() {
                    worker.set_state(ServiceWorkerState::Installed);
                }
                drop(registration);
                warn!(error = %err, "Activation failed");
                self.emit_state(worker_id, &manifest, ServiceWorkerState::Installed);
                Err(err)
            }
        }
    }

    async fn evict_stale(&self, keep: &[&str]) -> Result<usize, ServiceWorkerError> {
        let names = self
            .store
            .keys()
            .await
            .map_err(|e| ServiceWorkerError::ActivationFailed(e.to_string()))?;

        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| !keep.contains(&name.as_str()))
            .collect();

        try_join_all(stale.iter().map(|name| async move {
            self.store
                .delete(name)
                .await
                .map_err(|e| ServiceWorkerError::ActivationFailed(e.to_string()))
        }))
        .await?;

        for name in &stale {
            debug!(bucket = %name, "Evicted stale cache");
            self.emit(ServiceWorkerEvent::CacheEvicted { name: name.clone() });
        }
        Ok(stale.len())
    }

    /// Adopt an already populated bucket as the active generation.
    ///
    /// Returns `None` when the bucket is missing any precache resource; the
    /// caller should install instead.
    pub async fn restore(
        &self,
        manifest: PrecacheManifest,
    ) -> Result<Option<ServiceWorkerId>, ServiceWorkerError> {
        let scope = self.registration.read().await.scope.clone();
        let wanted = manifest.resource_urls(&scope)?;
        let entries = self.store.entries(manifest.cache_name()).await?;

        let complete = wanted
            .iter()
            .map(cache_key)
            .all(|key| entries.iter().any(|entry| entry.url == key));
        if !complete {
            debug!(generation = manifest.cache_name(), "Bucket incomplete, not restoring");
            return Ok(None);
        }

        let manifest = Arc::new(manifest);
        let worker_id = self
            .registration
            .write()
            .await
            .adopt_active(Arc::clone(&manifest))
            .id;
        info!(generation = manifest.cache_name(), "Restored active generation");
        self.emit_state(worker_id, &manifest, ServiceWorkerState::Activated);
        Ok(Some(worker_id))
    }

    /// Answer a fetch: cache hit, else network, else the fallback page.
    ///
    /// Without an active worker the request goes straight to the network.
    #[instrument(
        skip(self, event),
        fields(
            url = %event.request.url,
            navigation = event.request.is_navigation,
            client = event.client_id.as_deref(),
        )
    )]
    pub async fn handle_fetch(&self, event: FetchEvent) -> Result<FetchResponse, ServiceWorkerError> {
        let controller = {
            let registration = self.registration.read().await;
            match registration.controller() {
                Some(worker) => Some((
                    worker.generation().to_string(),
                    worker.manifest.fallback_url(&registration.scope)?,
                )),
                None => None,
            }
        };

        let FetchEvent { request, client_id } = event;

        let Some((generation, fallback_url)) = controller else {
            return self
                .fetcher
                .fetch(&request)
                .await
                .map(FetchResponse::from_network)
                .map_err(|e| ServiceWorkerError::NetworkError(e.to_string()));
        };

        if request.method == Method::GET {
            match self.store.match_entry(&generation, &cache_key(&request.url)).await {
                Ok(Some(entry)) => {
                    debug!("Cache hit");
                    return Ok(FetchResponse::from_entry(entry, ResponseSource::Cache));
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "Cache lookup failed, trying network"),
            }
        }

        let net_err = match self.fetcher.fetch(&request).await {
            Ok(response) => return Ok(FetchResponse::from_network(response)),
            Err(err) => err,
        };

        warn!(error = %net_err, "Network failed, serving fallback");
        let fallback_key = cache_key(&fallback_url);
        match self.store.match_entry(&generation, &fallback_key).await? {
            Some(entry) => {
                self.emit(ServiceWorkerEvent::FallbackServed {
                    url: request.url.to_string(),
                    navigation: request.is_navigation,
                    client_id,
                });
                Ok(FetchResponse::from_entry(entry, ResponseSource::Fallback))
            }
            None => Err(ServiceWorkerError::FallbackMissing(format!(
                "{} in cache '{}' (network: {})",
                fallback_key, generation, net_err
            ))),
        }
    }

    fn emit_state(
        &self,
        worker_id: ServiceWorkerId,
        manifest: &PrecacheManifest,
        new_state: ServiceWorkerState,
    ) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            generation: manifest.cache_name().to_string(),
            new_state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }
}

//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nimbus_common::NimbusConfig;
use nimbus_net::{HttpFetcher, LoaderConfig, Request};
use nimbus_router::{Connectivity, ConnectivityMonitor, ConnectivityRouter, RouterPages, SimulatedPage};
use nimbus_sw::{
    CacheStore, FetchEvent, FileCacheStore, OfflineCacheManager, PrecacheManifest,
    ResponseSource,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

fn fetcher(config: &NimbusConfig) -> anyhow::Result<Arc<HttpFetcher>> {
    let loader = LoaderConfig {
        user_agent: config.network.user_agent.clone(),
        ..Default::default()
    };
    Ok(Arc::new(HttpFetcher::new(loader)?))
}

async fn manager(config: &NimbusConfig) -> anyhow::Result<OfflineCacheManager> {
    let store = FileCacheStore::open(&config.cache.storage_dir)
        .await
        .with_context(|| format!("opening {}", config.cache.storage_dir.display()))?;

    let (manager, mut events) = OfflineCacheManager::new(
        config.network.scope.clone(),
        Arc::new(store),
        fetcher(config)?,
    );

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(?event, "Service worker event");
        }
    });

    Ok(manager)
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Adopt the generation if its bucket is complete, otherwise install and
/// activate it. Returns whether the bucket was restored.
async fn ensure_active(
    manager: &OfflineCacheManager,
    manifest: PrecacheManifest,
) -> anyhow::Result<bool> {
    if manager.restore(manifest.clone()).await?.is_some() {
        info!(generation = manifest.cache_name(), "Generation restored from store");
        return Ok(true);
    }

    manager.install(manifest).await.context("install")?;
    manager.activate().await.context("activate")?;
    Ok(false)
}

/// Restore or install the configured generation, then report status.
pub async fn sync(config: &NimbusConfig) -> anyhow::Result<()> {
    let manager = manager(config).await?;
    let manifest = PrecacheManifest::from_config(&config.cache)?;

    ensure_active(&manager, manifest).await?;

    print_json(&manager.status().await)
}

#[derive(Debug, Serialize)]
struct FetchReport {
    url: String,
    source: ResponseSource,
    status: u16,
    bytes: usize,
}

/// Route one request through the manager.
pub async fn fetch(config: &NimbusConfig, target: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let url = config
        .network
        .scope
        .join(target)
        .with_context(|| format!("resolving {}", target))?;

    let manager = manager(config).await?;
    let manifest = PrecacheManifest::from_config(&config.cache)?;
    if manager.restore(manifest).await?.is_none() {
        warn!(
            generation = %config.cache.name,
            "Cache generation not installed, request will not be intercepted"
        );
    }

    let response = manager
        .handle_fetch(FetchEvent::new(Request::navigate(url.clone())))
        .await?;

    if let Some(path) = output {
        tokio::fs::write(path, &response.body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), bytes = response.body.len(), "Body written");
    }

    print_json(&FetchReport {
        url: url.to_string(),
        source: response.source,
        status: response.status,
        bytes: response.body.len(),
    })
}

#[derive(Debug, Serialize, PartialEq)]
struct BucketReport {
    name: String,
    current: bool,
    entries: Vec<String>,
}

async fn bucket_reports(
    config: &NimbusConfig,
    store: &dyn CacheStore,
) -> anyhow::Result<Vec<BucketReport>> {
    let mut reports = Vec::new();
    for name in store.keys().await? {
        let mut entries: Vec<String> = store
            .entries(&name)
            .await?
            .into_iter()
            .map(|entry| entry.url)
            .collect();
        entries.sort();
        reports.push(BucketReport {
            current: name == config.cache.name,
            name,
            entries,
        });
    }
    Ok(reports)
}

/// List buckets in the configured store.
pub async fn status(config: &NimbusConfig) -> anyhow::Result<()> {
    let store = FileCacheStore::open(&config.cache.storage_dir).await?;
    print_json(&bucket_reports(config, &store).await?)
}

#[derive(Debug, Serialize, PartialEq)]
struct RouteReport {
    location: String,
    online: bool,
    navigate_to: Option<String>,
}

fn route_report(config: &NimbusConfig, location: Url, online: bool) -> anyhow::Result<RouteReport> {
    let pages = RouterPages::from_config(&config.pages)?;
    let connectivity = Connectivity::new(online);
    let router = ConnectivityRouter::new(
        SimulatedPage::new(location.clone()),
        pages,
        connectivity.subscribe(),
    );

    Ok(RouteReport {
        location: location.to_string(),
        online,
        navigate_to: router.reconcile().map(String::from),
    })
}

/// Reconcile once and report the navigation.
pub fn route(config: &NimbusConfig, location: Url, online: bool) -> anyhow::Result<()> {
    print_json(&route_report(config, location, online)?)
}

/// Probe connectivity and keep a simulated page routed until Ctrl-C.
pub async fn watch(config: &NimbusConfig, location: Url) -> anyhow::Result<()> {
    let pages = RouterPages::from_config(&config.pages)?;
    let monitor = ConnectivityMonitor::new(
        fetcher(config)?,
        config.network.probe_url().clone(),
        Duration::from_millis(config.network.probe_interval_ms),
    );

    let connectivity = Connectivity::new(monitor.probe_once().await);
    let page = Arc::new(SimulatedPage::new(location));
    let mut router = ConnectivityRouter::new(page.clone(), pages, connectivity.subscribe());

    info!(probe = %config.network.probe_url(), "Watching connectivity");

    tokio::select! {
        _ = router.run() => {}
        _ = monitor.run(connectivity.clone()) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
        }
    }

    print_json(&page.history().iter().map(Url::as_str).collect::<Vec<_>>())
}

//! Connectivity state and the probe that feeds it.

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use nimbus_net::{Fetcher, Request};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use url::Url;

/// Shared online/offline flag.
///
/// The current value is the readable "is online" boolean; each change is an
/// online or offline transition for subscribers.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Receiver for a router.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish the current state. Subscribers are only woken on a transition.
    ///
    /// Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }
}

/// Polls a URL and publishes whether it is reachable.
///
/// Any HTTP response counts as online; only a transport failure is offline.
pub struct ConnectivityMonitor {
    fetcher: Arc<dyn Fetcher>,
    probe: Url,
    interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(fetcher: Arc<dyn Fetcher>, probe: Url, interval: Duration) -> Self {
        Self {
            fetcher,
            probe,
            interval,
        }
    }

    /// One probe.
    pub async fn probe_once(&self) -> bool {
        let request = Request::get(self.probe.clone()).method(Method::HEAD);
        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                debug!(probe = %self.probe, status = %response.status, "Probe answered");
                true
            }
            Err(err) => {
                debug!(probe = %self.probe, error = %err, "Probe failed");
                false
            }
        }
    }

    /// Probe forever, publishing transitions into `connectivity`.
    pub async fn run(&self, connectivity: Connectivity) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let online = self.probe_once().await;
            if connectivity.set_online(online) {
                info!(online, "Connectivity changed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::StatusCode;
    use nimbus_net::{NetError, Response};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct SwitchFetcher {
        up: AtomicBool,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for SwitchFetcher {
        async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.method, Method::HEAD);
            if self.up.load(Ordering::SeqCst) {
                Ok(Response::new(request, StatusCode::METHOD_NOT_ALLOWED, ""))
            } else {
                Err(NetError::Unreachable("down".to_string()))
            }
        }
    }

    fn probe_url() -> Url {
        Url::parse("https://weather.example/src/").unwrap()
    }

    #[test]
    fn test_connectivity_only_signals_transitions() {
        let connectivity = Connectivity::new(true);
        let mut rx = connectivity.subscribe();

        assert!(!connectivity.set_online(true));
        assert!(!rx.has_changed().unwrap());

        assert!(connectivity.set_online(false));
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(!connectivity.is_online());
    }

    #[tokio::test]
    async fn test_probe_treats_any_response_as_online() {
        let fetcher = Arc::new(SwitchFetcher::default());
        let monitor = ConnectivityMonitor::new(fetcher.clone(), probe_url(), Duration::from_secs(1));

        assert!(!monitor.probe_once().await);
        fetcher.up.store(true, Ordering::SeqCst);
        assert!(monitor.probe_once().await);
        assert_eq!(fetcher.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_publishes_transitions() {
        let fetcher = Arc::new(SwitchFetcher::default());
        let monitor = ConnectivityMonitor::new(fetcher.clone(), probe_url(), Duration::from_millis(5));
        let connectivity = Connectivity::new(true);
        let mut rx = connectivity.subscribe();

        let task = tokio::spawn({
            let connectivity = connectivity.clone();
            async move { monitor.run(connectivity).await }
        });

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!*rx.borrow_and_update());

        fetcher.up.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*rx.borrow_and_update());

        task.abort();
    }
}

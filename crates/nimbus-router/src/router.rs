//! Connectivity router.

use nimbus_common::config::is_page_name;
use nimbus_common::PagesConfig;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::host::PageHost;
use crate::RouterError;

/// Whether `location` is showing `page`.
///
/// Compares the last non-empty path segment, percent-decoded, with the page
/// name exactly, so `/src/index.html` and `/index.html` are both on
/// `index.html` while `/myindex.html` is not.
pub fn is_on_page(location: &Url, page: &str) -> bool {
    location
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .and_then(|last| urlencoding::decode(last).ok())
        .is_some_and(|last| last == page)
}

/// The two canonical destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterPages {
    online: String,
    fallback: String,
}

impl RouterPages {
    pub fn new(online: impl Into<String>, fallback: impl Into<String>) -> Result<Self, RouterError> {
        let online = online.into();
        let fallback = fallback.into();

        for page in [&online, &fallback] {
            if !is_page_name(page) {
                return Err(RouterError::InvalidPage(page.clone()));
            }
        }
        if online == fallback {
            return Err(RouterError::InvalidPage(format!(
                "online and fallback are both '{}'",
                online
            )));
        }

        Ok(Self { online, fallback })
    }

    pub fn from_config(config: &PagesConfig) -> Result<Self, RouterError> {
        Self::new(config.online.as_str(), config.fallback.as_str())
    }

    pub fn online(&self) -> &str {
        &self.online
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Page that should be displayed for the given connectivity.
    pub fn page_for(&self, online: bool) -> &str {
        if online {
            &self.online
        } else {
            &self.fallback
        }
    }

    /// Where to navigate from `location`, or `None` if it is already right.
    pub fn target_for(&self, location: &Url, online: bool) -> Option<Url> {
        let page = self.page_for(online);
        if is_on_page(location, page) {
            return None;
        }
        match location.join(page) {
            Ok(target) => Some(target),
            Err(err) => {
                warn!(location = %location, page, error = %err, "Cannot resolve page");
                None
            }
        }
    }
}

/// Keeps a [`PageHost`] on the page matching current connectivity.
pub struct ConnectivityRouter<H: PageHost> {
    host: H,
    pages: RouterPages,
    connectivity: watch::Receiver<bool>,
}

impl<H: PageHost> ConnectivityRouter<H> {
    pub fn new(host: H, pages: RouterPages, connectivity: watch::Receiver<bool>) -> Self {
        Self {
            host,
            pages,
            connectivity,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Navigate if the displayed page does not match connectivity.
    ///
    /// Returns the navigation target, if any.
    pub fn reconcile(&self) -> Option<Url> {
        let online = *self.connectivity.borrow();
        let location = self.host.location();

        let Some(target) = self.pages.target_for(&location, online) else {
            debug!(location = %location, online, "Page matches connectivity");
            return None;
        };

        info!(from = %location, to = %target, online, "Connectivity redirect");
        self.host.navigate(target.clone());
        Some(target)
    }

    /// Reconcile now, then after every connectivity change.
    ///
    /// Returns once the connectivity sender is dropped.
    pub async fn run(&mut self) {
        self.connectivity.borrow_and_update();
        self.reconcile();

        while self.connectivity.changed().await.is_ok() {
            self.reconcile();
        }
        debug!("Connectivity source closed, router stopping");
    }
}

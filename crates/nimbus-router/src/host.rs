//! Where the displayed page lives.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;
use url::Url;

/// The page context the router drives.
pub trait PageHost: Send + Sync {
    /// Current location of the displayed page.
    fn location(&self) -> Url;

    /// Full-page navigation. Fire-and-forget.
    fn navigate(&self, target: Url);
}

impl<T: PageHost + ?Sized> PageHost for Arc<T> {
    fn location(&self) -> Url {
        (**self).location()
    }

    fn navigate(&self, target: Url) {
        (**self).navigate(target)
    }
}

/// In-process page that records its navigation history.
///
/// Navigating replaces the location, the way a reload lands on the new page.
#[derive(Debug)]
pub struct SimulatedPage {
    location: Mutex<Url>,
    history: Mutex<Vec<Url>>,
}

impl SimulatedPage {
    pub fn new(location: Url) -> Self {
        Self {
            location: Mutex::new(location),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every navigation so far, oldest first.
    pub fn history(&self) -> Vec<Url> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PageHost for SimulatedPage {
    fn location(&self) -> Url {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn navigate(&self, target: Url) {
        info!(target = %target, "Navigating");
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = target.clone();
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target);
    }
}

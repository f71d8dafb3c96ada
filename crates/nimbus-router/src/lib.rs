//! # Nimbus Router
//!
//! Page-side half of the offline subsystem. The router keeps the displayed
//! page in line with connectivity: online shows the main page, offline shows
//! the fallback page.
//!
//! ```text
//! ConnectivityMonitor ──probe──▶ Connectivity (watch<bool>)
//!                                      │
//!                                      ▼
//!                             ConnectivityRouter ──navigate──▶ PageHost
//! ```
//!
//! A location is on a page when the last non-empty segment of its path is
//! exactly the page's file name. Targets are resolved relative to the current
//! location.

use thiserror::Error;

pub mod host;
pub mod monitor;
pub mod router;

pub use host::{PageHost, SimulatedPage};
pub use monitor::{Connectivity, ConnectivityMonitor};
pub use router::{is_on_page, ConnectivityRouter, RouterPages};

/// Errors that can occur when configuring the router.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Invalid page name: {0}")]
    InvalidPage(String),
}

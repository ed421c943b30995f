//! Round-robin proxy rotation
//!
//! The pool is fixed at construction. The cursor is the only shared mutable
//! state and advances with a single atomic update, so concurrent callers
//! never observe the same tick.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::domain::ProxyEndpoint;

#[derive(Debug, Default)]
pub struct ProxyRotator {
    pool: Vec<ProxyEndpoint>,
    cursor: AtomicUsize,
}

impl ProxyRotator {
    #[must_use]
    pub fn new(pool: Vec<ProxyEndpoint>) -> Self {
        Self {
            pool,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Rotator that always answers "direct connection"
    #[must_use]
    pub fn direct() -> Self {
        Self::default()
    }

    /// Parses a newline-delimited list; blank lines and `#` comments are ignored
    #[must_use]
    pub fn parse_list(text: &str) -> Vec<ProxyEndpoint> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ProxyEndpoint::new)
            .collect()
    }

    /// Loads the pool from a file. A missing or unreadable file yields an
    /// empty pool, which is a supported mode.
    pub fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let pool = Self::parse_list(&text);
                info!("Loaded {} proxies from {}", pool.len(), path.display());
                Self::new(pool)
            }
            Err(e) => {
                warn!(
                    "Proxy file {} not usable ({}); using direct connections",
                    path.display(),
                    e
                );
                Self::direct()
            }
        }
    }

    /// Next proxy in round-robin order, `None` when the pool is empty
    pub fn next(&self) -> Option<ProxyEndpoint> {
        let len = self.pool.len();
        if len == 0 {
            return None;
        }
        let tick = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .unwrap_or_else(|current| current);
        self.pool.get(tick).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn endpoints(&self) -> &[ProxyEndpoint] {
        &self.pool
    }
}

//! In-memory caches fronting the ledger and derived aggregates.
//!
//! Three independent [`TtlCache`] instances exist, each with its own TTL and
//! key namespace (see [`keys`]). Nothing invalidates across caches except the
//! affiliate service after a ledger write.

pub mod keys;
mod ttl;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::CacheConfig;
use crate::services::{Affiliate, HealthReport, MetricsSnapshot};

pub use ttl::{CacheStats, TtlCache};

/// The three caches shared by the services.
pub struct AppCaches {
    pub affiliate: TtlCache<Affiliate>,
    pub metrics: TtlCache<MetricsSnapshot>,
    pub health: TtlCache<HealthReport>,
}

/// A per-cache figure, used for stats and for clear/cleanup counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PerCache<T> {
    pub affiliate: T,
    pub metrics: T,
    pub health: T,
}

impl AppCaches {
    pub fn new(cfg: &CacheConfig) -> Self {
        Self {
            affiliate: TtlCache::new("affiliate", cfg.affiliate_ttl()),
            metrics: TtlCache::new("metrics", cfg.metrics_ttl()),
            health: TtlCache::new("health", cfg.health_ttl()),
        }
    }

    pub fn stats(&self) -> PerCache<CacheStats> {
        PerCache {
            affiliate: self.affiliate.stats(),
            metrics: self.metrics.stats(),
            health: self.health.stats(),
        }
    }

    /// Drops every entry of every cache.
    pub fn clear(&self) -> PerCache<usize> {
        let cleared = PerCache {
            affiliate: self.affiliate.clear(),
            metrics: self.metrics.clear(),
            health: self.health.clear(),
        };
        tracing::info!(
            affiliate = cleared.affiliate,
            metrics = cleared.metrics,
            health = cleared.health,
            "Caches cleared"
        );
        cleared
    }

    /// Evicts expired entries from every cache.
    pub fn cleanup_expired(&self) -> PerCache<usize> {
        PerCache {
            affiliate: self.affiliate.cleanup_expired(),
            metrics: self.metrics.cleanup_expired(),
            health: self.health.cleanup_expired(),
        }
    }
}

impl Default for AppCaches {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// Start the background sweep of expired entries.
///
/// Returns `None` when `interval` is zero.
pub fn spawn_cache_sweeper(
    caches: Arc<AppCaches>,
    interval: Duration,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval.is_zero() {
        tracing::debug!("Cache sweeper disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let removed = caches.cleanup_expired();
            let total = removed.affiliate + removed.metrics + removed.health;
            if total > 0 {
                tracing::debug!(
                    affiliate = removed.affiliate,
                    metrics = removed.metrics,
                    health = removed.health,
                    "Cache cleanup completed"
                );
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_evicts_expired_entries() {
        let caches = Arc::new(AppCaches::default());
        caches.metrics.insert_with_ttl(
            keys::METRICS,
            MetricsSnapshot::default(),
            Duration::from_millis(5),
        );

        let handle = spawn_cache_sweeper(caches.clone(), Duration::from_millis(20))
            .expect("sweeper enabled");
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.abort();

        assert!(caches.metrics.is_empty());
        assert_eq!(caches.metrics.stats().evictions, 1);
    }

    #[test]
    fn zero_interval_disables_sweeper() {
        let caches = Arc::new(AppCaches::default());
        assert!(spawn_cache_sweeper(caches, Duration::ZERO).is_none());
    }

    #[test]
    fn clear_reports_counts_per_cache() {
        let caches = AppCaches::default();
        caches.metrics.insert(keys::METRICS, MetricsSnapshot::default());

        let cleared = caches.clear();
        assert_eq!(
            cleared,
            PerCache {
                affiliate: 0,
                metrics: 1,
                health: 0
            }
        );
    }
}

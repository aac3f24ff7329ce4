use std::sync::Arc;
use std::time::Duration;

use affiliate_ledger::{Ledger, LedgerStore, unix_now};
use serde::{Deserialize, Serialize};

use crate::cache::{AppCaches, keys};
use crate::config::ExternalServiceConfig;
use crate::error::AffiliateError;
use crate::services::run_blocking;

pub const SERVICE_NAME: &str = "affiliate-relay";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
    Unreachable,
    NotConfigured,
}

impl CheckStatus {
    /// Whether this check lets the overall status stay healthy.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Healthy | Self::NotConfigured)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChecks {
    pub affiliate_data: CheckStatus,
    pub main_server: CheckStatus,
    /// No secondary store exists; always healthy.
    pub database: CheckStatus,
}

impl HealthChecks {
    pub fn overall(&self) -> CheckStatus {
        if [self.affiliate_data, self.main_server, self.database]
            .into_iter()
            .all(CheckStatus::is_ok)
        {
            CheckStatus::Healthy
        } else {
            CheckStatus::Unhealthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: CheckStatus,
    pub timestamp: i64,
    #[serde(flatten)]
    pub outcome: HealthOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HealthOutcome {
    Checked {
        service: &'static str,
        version: &'static str,
        checks: HealthChecks,
    },
    /// The check itself could not run. Never cached.
    Failed { error: String },
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == CheckStatus::Healthy
    }

    fn checked(checks: HealthChecks) -> Self {
        Self {
            status: checks.overall(),
            timestamp: unix_now(),
            outcome: HealthOutcome::Checked {
                service: SERVICE_NAME,
                version: env!("CARGO_PKG_VERSION"),
                checks,
            },
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Unhealthy,
            timestamp: unix_now(),
            outcome: HealthOutcome::Failed {
                error: error.into(),
            },
        }
    }
}

#[derive(Clone)]
pub struct HealthService {
    ledger: Arc<LedgerStore>,
    caches: Arc<AppCaches>,
    http: reqwest::Client,
    external: Option<ExternalServiceConfig>,
    probe_timeout: Duration,
}

impl HealthService {
    pub fn new(
        ledger: Arc<LedgerStore>,
        caches: Arc<AppCaches>,
        http: reqwest::Client,
        external: Option<ExternalServiceConfig>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            caches,
            http,
            external,
            probe_timeout,
        }
    }

    /// Cache-through health check. Failed reports are returned uncached.
    pub async fn check_health(&self) -> HealthReport {
        if let Some(cached) = self.caches.health.get(keys::HEALTH) {
            return cached;
        }

        let ledger = Arc::clone(&self.ledger);
        let persisted = run_blocking(move || ledger.read_persisted()).await;
        let affiliate_data = match persisted {
            Ok(Ok(_)) => CheckStatus::Healthy,
            Ok(Err(e)) if e.is_malformed() => {
                tracing::warn!(error = %e, "Ledger file is not a valid mapping");
                CheckStatus::Unhealthy
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Health check failed");
                return HealthReport::failed(e.to_string());
            }
            Err(e) => {
                tracing::error!(error = %e, "Health check failed");
                return HealthReport::failed(e.to_string());
            }
        };

        let checks = HealthChecks {
            affiliate_data,
            main_server: self.probe_main_server().await,
            database: CheckStatus::Healthy,
        };
        let report = HealthReport::checked(checks);
        self.caches.health.insert(keys::HEALTH, report.clone());
        report
    }

    async fn probe_main_server(&self) -> CheckStatus {
        let Some(external) = &self.external else {
            return CheckStatus::NotConfigured;
        };
        let url = format!("{}/health", external.base_url());
        match self.http.get(&url).timeout(self.probe_timeout).send().await {
            Ok(resp) if resp.status().is_success() => CheckStatus::Healthy,
            Ok(resp) => {
                tracing::debug!(status = resp.status().as_u16(), "Main server reported unhealthy");
                CheckStatus::Unhealthy
            }
            Err(e) => {
                tracing::debug!(error = %e, "Main server unreachable");
                CheckStatus::Unreachable
            }
        }
    }
}

/// Aggregate commission figures over the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_affiliates: usize,
    pub total_commissions: usize,
    pub total_commission_amount: f64,
    pub timestamp: i64,
}

impl MetricsSnapshot {
    pub fn from_ledger(ledger: &Ledger, timestamp: i64) -> Self {
        let (total_commissions, total_commission_amount) = ledger
            .values()
            .fold((0, 0.0), |(count, sum), record| {
                (count + record.commissions.len(), sum + record.total_commission())
            });
        Self {
            total_affiliates: ledger.len(),
            total_commissions,
            total_commission_amount,
            timestamp,
        }
    }
}

#[derive(Clone)]
pub struct MetricsService {
    ledger: Arc<LedgerStore>,
    caches: Arc<AppCaches>,
}

impl MetricsService {
    pub fn new(ledger: Arc<LedgerStore>, caches: Arc<AppCaches>) -> Self {
        Self { ledger, caches }
    }

    /// Cache-through aggregate over the persisted ledger. Read failures are
    /// returned, not swallowed.
    pub async fn get_metrics(&self) -> Result<MetricsSnapshot, AffiliateError> {
        if let Some(cached) = self.caches.metrics.get(keys::METRICS) {
            return Ok(cached);
        }

        let generation = self.caches.metrics.generation();
        let ledger = Arc::clone(&self.ledger);
        let snapshot = run_blocking(move || {
            ledger
                .read_persisted()
                .map(|ledger| MetricsSnapshot::from_ledger(&ledger, unix_now()))
        })
        .await?
        .inspect_err(|e| tracing::error!(error = %e, "Metrics collection failed"))?;

        self.caches
            .metrics
            .insert_if_current(keys::METRICS, snapshot.clone(), generation);
        Ok(snapshot)
    }
}

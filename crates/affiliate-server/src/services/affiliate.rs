use std::sync::Arc;

use affiliate_ledger::{AffiliateRecord, LedgerStore, NewCommission};
use serde::{Deserialize, Serialize};

use crate::cache::{AppCaches, keys};
use crate::config::ExternalServiceConfig;
use crate::error::AffiliateError;
use crate::metrics;
use crate::services::run_blocking;

/// An affiliate record tagged with its ID, as served to clients and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affiliate {
    pub affiliate_id: String,
    #[serde(flatten)]
    pub record: AffiliateRecord,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub affiliate_id: String,
    pub blink_url: String,
    pub message: String,
}

/// Registration, cache-through reads and commission bookkeeping.
#[derive(Clone)]
pub struct AffiliateService {
    ledger: Arc<LedgerStore>,
    caches: Arc<AppCaches>,
    external: Option<ExternalServiceConfig>,
}

impl AffiliateService {
    pub fn new(
        ledger: Arc<LedgerStore>,
        caches: Arc<AppCaches>,
        external: Option<ExternalServiceConfig>,
    ) -> Self {
        Self {
            ledger,
            caches,
            external,
        }
    }

    /// Creates an affiliate and builds its Solana Blink URL.
    ///
    /// Fails before touching the ledger when the partner server is not
    /// configured.
    pub async fn register_affiliate(&self) -> Result<Registration, AffiliateError> {
        let external = self
            .external
            .as_ref()
            .ok_or_else(AffiliateError::not_configured)?;

        let ledger = Arc::clone(&self.ledger);
        let affiliate_id = run_blocking(move || ledger.create_affiliate()).await??;
        let blink_url = blink_url(external.base_url(), &affiliate_id);
        let message = format!("Affiliate registered successfully! Your Solana Blink URL is: {blink_url}");

        tracing::info!(affiliate_id = %affiliate_id, "Registered new affiliate");
        Ok(Registration {
            affiliate_id,
            blink_url,
            message,
        })
    }

    /// Cache-through read. Unknown affiliates are not cached.
    pub async fn get_affiliate_data(
        &self,
        affiliate_id: &str,
    ) -> Result<Option<Affiliate>, AffiliateError> {
        let key = keys::affiliate(affiliate_id);
        if let Some(cached) = self.caches.affiliate.get(&key) {
            return Ok(Some(cached));
        }

        let generation = self.caches.affiliate.generation();
        let ledger = Arc::clone(&self.ledger);
        let id = affiliate_id.to_string();
        let Some(record) = run_blocking(move || ledger.get_affiliate_data(&id)).await? else {
            return Ok(None);
        };

        let affiliate = Affiliate {
            affiliate_id: affiliate_id.to_string(),
            record,
        };
        self.caches
            .affiliate
            .insert_if_current(key, affiliate.clone(), generation);
        Ok(Some(affiliate))
    }

    /// Like [`AffiliateService::get_affiliate_data`], but an unknown ID is an error.
    pub async fn require_affiliate(&self, affiliate_id: &str) -> Result<Affiliate, AffiliateError> {
        self.get_affiliate_data(affiliate_id)
            .await?
            .ok_or_else(|| AffiliateError::NotFound(affiliate_id.to_string()))
    }

    /// Overwrites an affiliate's record and invalidates what depends on it.
    pub async fn store_affiliate_data(
        &self,
        affiliate_id: &str,
        record: AffiliateRecord,
    ) -> Result<(), AffiliateError> {
        let ledger = Arc::clone(&self.ledger);
        let id = affiliate_id.to_string();
        run_blocking(move || ledger.store_affiliate_data(&id, record)).await??;
        self.invalidate(affiliate_id);
        Ok(())
    }

    /// Appends a commission. `Ok(false)` means the input was rejected or the
    /// affiliate is unknown; caches are left untouched in that case.
    pub async fn record_commission(
        &self,
        commission: &NewCommission,
    ) -> Result<bool, AffiliateError> {
        let ledger = Arc::clone(&self.ledger);
        let owned = commission.clone();
        let recorded = run_blocking(move || ledger.record_commission(&owned)).await??;
        if recorded {
            self.invalidate(&commission.affiliate_id);
            metrics::record_commission_recorded();
            tracing::debug!(
                affiliate_id = %commission.affiliate_id,
                "Invalidated cache for affiliate"
            );
        }
        Ok(recorded)
    }

    fn invalidate(&self, affiliate_id: &str) {
        self.caches.affiliate.remove(&keys::affiliate(affiliate_id));
        self.caches.metrics.remove(keys::METRICS);
    }
}

/// `solana-action:` followed by the percent-encoded purchase action URL.
pub fn blink_url(base_url: &str, affiliate_id: &str) -> String {
    let action_url = format!(
        "{}/affiliate_buy_tokens?affiliate_id={affiliate_id}",
        base_url.trim_end_matches('/')
    );
    format!("solana-action:{}", urlencoding::encode(&action_url))
}

//! Business operations composed from the ledger and the caches.

mod affiliate;
mod monitoring;
mod relay;

pub use affiliate::{Affiliate, AffiliateService, Registration, blink_url};
pub use monitoring::{
    CheckStatus, HealthChecks, HealthOutcome, HealthReport, HealthService, MetricsService,
    MetricsSnapshot, SERVICE_NAME,
};
pub use relay::{BuyTokensRequest, MAX_PURCHASE_AMOUNT, TransactionRelay, TransactionResponse};

use crate::error::AffiliateError;

/// Runs ledger I/O on the blocking pool. Ledger writes hold a lock across
/// an fsync and must not park runtime workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, AffiliateError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(AffiliateError::join_failed)
}

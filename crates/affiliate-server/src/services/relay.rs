//! Forwarding of token purchases to the partner transaction server.
//!
//! The relay makes exactly one outbound attempt per purchase. A successful
//! purchase is credited to the referring affiliate afterwards; failing to
//! record that commission never fails the purchase itself.

use affiliate_ledger::NewCommission;
use serde::{Deserialize, Serialize};

use crate::config::{AffiliateConfig, ExternalServiceConfig};
use crate::error::AffiliateError;
use crate::metrics;
use crate::services::AffiliateService;

/// Largest purchase amount accepted by the relay.
pub const MAX_PURCHASE_AMOUNT: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyTokensRequest {
    pub amount: f64,
    pub affiliate_id: String,
}

impl BuyTokensRequest {
    /// Strips surrounding whitespace from the affiliate ID. The trimmed ID is
    /// the one validated and credited.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let trimmed = self.affiliate_id.trim();
        if trimmed.len() != self.affiliate_id.len() {
            self.affiliate_id = trimmed.to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), AffiliateError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(AffiliateError::invalid_input("amount must be positive"));
        }
        if self.amount > MAX_PURCHASE_AMOUNT {
            return Err(AffiliateError::invalid_input(format!(
                "amount must not exceed {MAX_PURCHASE_AMOUNT}"
            )));
        }
        if self.affiliate_id.is_empty() {
            return Err(AffiliateError::invalid_input("affiliate_id must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub transaction: String,
}

#[derive(Deserialize)]
struct UpstreamReply {
    transaction: Option<String>,
}

#[derive(Clone)]
pub struct TransactionRelay {
    http: reqwest::Client,
    external: Option<ExternalServiceConfig>,
    commission_rate: f64,
    default_ico_id: String,
    affiliates: AffiliateService,
}

impl TransactionRelay {
    pub fn new(
        http: reqwest::Client,
        external: Option<ExternalServiceConfig>,
        affiliate_cfg: &AffiliateConfig,
        affiliates: AffiliateService,
    ) -> Self {
        Self {
            http,
            external,
            commission_rate: affiliate_cfg.commission_rate,
            default_ico_id: affiliate_cfg.default_ico_id.clone(),
            affiliates,
        }
    }

    pub async fn process_buy_tokens(
        &self,
        request: BuyTokensRequest,
        client_ip: &str,
    ) -> Result<TransactionResponse, AffiliateError> {
        let result = self.relay(request, client_ip).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.relay_outcome(),
        };
        metrics::record_relay_outcome(outcome);
        result
    }

    async fn relay(
        &self,
        request: BuyTokensRequest,
        client_ip: &str,
    ) -> Result<TransactionResponse, AffiliateError> {
        let request = request.normalized();
        request.validate()?;
        let external = self
            .external
            .as_ref()
            .ok_or_else(AffiliateError::not_configured)?;

        let transaction = self.request_transaction(external, request.amount).await?;

        let commission = NewCommission {
            affiliate_id: request.affiliate_id.clone(),
            ico_id: self.default_ico_id.clone(),
            amount: request.amount,
            commission: request.amount * self.commission_rate,
            client_ip: client_ip.to_string(),
        };
        match self.affiliates.record_commission(&commission).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                affiliate_id = %request.affiliate_id,
                "Failed to record commission for affiliate"
            ),
            Err(e) => tracing::warn!(
                affiliate_id = %request.affiliate_id,
                error = %e,
                "Failed to record commission for affiliate"
            ),
        }

        tracing::info!(
            affiliate_id = %request.affiliate_id,
            amount = request.amount,
            "Token purchase processed"
        );
        Ok(TransactionResponse { transaction })
    }

    /// `POST <base>/buy_tokens_action` with `{"amount": ..}`, single attempt.
    async fn request_transaction(
        &self,
        external: &ExternalServiceConfig,
        amount: f64,
    ) -> Result<String, AffiliateError> {
        let url = format!("{}/buy_tokens_action", external.base_url());
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "amount": amount }))
            .timeout(external.request_timeout())
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "HTTP error from main server");
            return Err(AffiliateError::UpstreamStatus(status.as_u16()));
        }

        let reply: UpstreamReply = response.json().await.map_err(|e| {
            if e.is_timeout() {
                classify_transport_error(e)
            } else {
                AffiliateError::InvalidUpstreamResponse(e.to_string())
            }
        })?;

        reply
            .transaction
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AffiliateError::InvalidUpstreamResponse(
                    "Failed to get transaction from main server".into(),
                )
            })
    }
}

fn classify_transport_error(err: reqwest::Error) -> AffiliateError {
    if err.is_timeout() {
        tracing::error!("Timeout connecting to main server");
        AffiliateError::UpstreamTimeout
    } else {
        tracing::error!(error = %err, "Request error to main server");
        AffiliateError::UpstreamUnreachable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: f64, affiliate_id: &str) -> BuyTokensRequest {
        BuyTokensRequest {
            amount,
            affiliate_id: affiliate_id.into(),
        }
    }

    #[test]
    fn validates_amount_bounds() {
        assert!(request(1.0, "aff").validate().is_ok());
        assert!(request(MAX_PURCHASE_AMOUNT, "aff").validate().is_ok());
        assert!(request(0.0, "aff").validate().is_err());
        assert!(request(-5.0, "aff").validate().is_err());
        assert!(request(MAX_PURCHASE_AMOUNT + 1.0, "aff").validate().is_err());
        assert!(request(f64::INFINITY, "aff").validate().is_err());
    }

    #[test]
    fn rejects_blank_affiliate_id() {
        let err = request(10.0, "   ").normalized().validate().unwrap_err();
        assert!(matches!(err, AffiliateError::InvalidInput(_)));
    }

    #[test]
    fn normalized_trims_affiliate_id() {
        let req = request(10.0, "  aff-1\t").normalized();
        assert_eq!(req.affiliate_id, "aff-1");
        assert!(req.validate().is_ok());

        assert_eq!(request(10.0, "aff-1").normalized().affiliate_id, "aff-1");
    }
}

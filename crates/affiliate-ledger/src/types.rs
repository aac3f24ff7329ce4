//! Record types persisted in the ledger file.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::LedgerError;

/// The full ledger: affiliate ID to record, in registration order.
pub type Ledger = IndexMap<String, AffiliateRecord>;

/// Current server time as Unix seconds.
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// A single commission credited to an affiliate. Never edited once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub ico_id: String,
    /// Purchase amount the commission was computed from.
    pub amount: f64,
    /// The affiliate's cut.
    pub commission: f64,
    pub client_ip: String,
    /// Unix seconds, server clock at recording time.
    pub timestamp: i64,
}

impl CommissionRecord {
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_fields(
            &self.ico_id,
            self.amount,
            self.commission,
            &self.client_ip,
        )
    }
}

/// Commission history of one affiliate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AffiliateRecord {
    #[serde(default)]
    pub commissions: Vec<CommissionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

impl AffiliateRecord {
    /// Checks every commission in the record.
    pub fn validate(&self) -> Result<(), LedgerError> {
        for (index, commission) in self.commissions.iter().enumerate() {
            commission.validate().map_err(|e| {
                LedgerError::invalid_input(format!("commissions[{index}]: {e}"))
            })?;
        }
        Ok(())
    }

    /// Sum of the commission amounts earned by this affiliate.
    pub fn total_commission(&self) -> f64 {
        self.commissions.iter().map(|c| c.commission).sum()
    }
}

/// A commission to be recorded against an affiliate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommission {
    pub affiliate_id: String,
    pub ico_id: String,
    pub amount: f64,
    pub commission: f64,
    pub client_ip: String,
}

impl NewCommission {
    /// Validates every field except affiliate existence.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.affiliate_id.is_empty() {
            return Err(LedgerError::invalid_input("affiliate_id must not be empty"));
        }
        validate_fields(
            &self.ico_id,
            self.amount,
            self.commission,
            &self.client_ip,
        )
    }

    /// Stamps the commission with `timestamp`.
    pub fn into_record(self, timestamp: i64) -> CommissionRecord {
        CommissionRecord {
            ico_id: self.ico_id,
            amount: self.amount,
            commission: self.commission,
            client_ip: self.client_ip,
            timestamp,
        }
    }
}

fn validate_fields(
    ico_id: &str,
    amount: f64,
    commission: f64,
    client_ip: &str,
) -> Result<(), LedgerError> {
    if ico_id.is_empty() {
        return Err(LedgerError::invalid_input("ico_id must not be empty"));
    }
    if client_ip.is_empty() {
        return Err(LedgerError::invalid_input("client_ip must not be empty"));
    }
    if !amount.is_finite() || amount <= 0.0 {
        return Err(LedgerError::invalid_input("amount must be positive"));
    }
    if !commission.is_finite() || commission < 0.0 {
        return Err(LedgerError::invalid_input(
            "commission must not be negative",
        ));
    }
    Ok(())
}

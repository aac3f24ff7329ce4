//! # affiliate-ledger
//!
//! Durable ledger of affiliates and the commissions credited to them.
//!
//! The whole ledger lives in a single pretty-printed JSON file, mapping each
//! affiliate ID to its record:
//!
//! ```json
//! {
//!     "6f1c...": {
//!         "commissions": [
//!             {
//!                 "ico_id": "main_ico",
//!                 "amount": 100.0,
//!                 "commission": 1.0,
//!                 "client_ip": "203.0.113.7",
//!                 "timestamp": 1717171717
//!             }
//!         ]
//!     }
//! }
//! ```
//!
//! [`LedgerStore`] keeps the mapping in memory and rewrites the file after
//! every mutation. All mutations are serialized behind one lock so concurrent
//! writers never lose each other's updates.
//!
//! ## Example
//!
//! ```no_run
//! use affiliate_ledger::{LedgerStore, NewCommission};
//!
//! # fn main() -> Result<(), affiliate_ledger::LedgerError> {
//! let store = LedgerStore::open("affiliate_data.json");
//! let id = store.create_affiliate()?;
//! let recorded = store.record_commission(&NewCommission {
//!     affiliate_id: id.clone(),
//!     ico_id: "main_ico".into(),
//!     amount: 100.0,
//!     commission: 1.0,
//!     client_ip: "203.0.113.7".into(),
//! })?;
//! assert!(recorded);
//! # Ok(())
//! # }
//! ```

mod error;
mod store;
mod types;

pub use error::{ErrorCategory, LedgerError};
pub use store::{LedgerStore, read_persisted};
pub use types::{AffiliateRecord, CommissionRecord, Ledger, NewCommission, unix_now};

/// Type alias for a ledger result.
pub type LedgerResult<T> = Result<T, LedgerError>;

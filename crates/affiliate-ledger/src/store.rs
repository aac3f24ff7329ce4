//! File-backed ledger store.
//!
//! The ledger is held in memory and flushed to a single JSON file after every
//! mutation. Writes go to a temporary file in the same directory which is then
//! renamed over the target, so a failed write never exposes a partial file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::LedgerResult;
use crate::error::LedgerError;
use crate::types::{AffiliateRecord, Ledger, NewCommission, unix_now};

/// Reads the ledger file strictly.
///
/// A missing file is an empty ledger. Content that is not a JSON object of
/// affiliate records is reported as [`LedgerError::Malformed`].
pub fn read_persisted(path: &Path) -> LedgerResult<Ledger> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Ledger::new()),
        Err(e) => return Err(LedgerError::io(path, e)),
    };
    serde_json::from_slice::<Ledger>(&bytes).map_err(|e| LedgerError::malformed(path, e.to_string()))
}

/// Reads the ledger file, degrading to an empty ledger on any failure.
pub(crate) fn load_or_default(path: &Path) -> Ledger {
    match read_persisted(path) {
        Ok(ledger) => ledger,
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                category = %e.category(),
                error = %e,
                "Error loading affiliate data, starting with an empty ledger"
            );
            Ledger::new()
        }
    }
}

fn encode(ledger: &Ledger) -> LedgerResult<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    ledger.serialize(&mut serializer)?;
    Ok(buf)
}

fn write_atomic(path: &Path, data: &[u8]) -> LedgerResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let fail = |e: std::io::Error| LedgerError::persistence(path, e);

    fs::create_dir_all(&parent).map_err(fail)?;
    let mut tmp = NamedTempFile::new_in(&parent).map_err(fail)?;
    tmp.write_all(data).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

/// The single source of truth for affiliates and their commissions.
///
/// One lock guards load, mutate and save as a unit. Mutations are applied to
/// a copy which replaces the in-memory ledger only after the file write
/// succeeded, so memory and disk never diverge.
#[derive(Debug)]
pub struct LedgerStore {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl LedgerStore {
    /// Opens the store, loading whatever the backing file currently holds.
    ///
    /// Never fails: a missing or corrupt file yields an empty ledger.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ledger = load_or_default(&path);
        tracing::info!(
            path = %path.display(),
            affiliates = ledger.len(),
            "Affiliate ledger loaded"
        );
        Self {
            path,
            ledger: Mutex::new(ledger),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the backing file (fail-soft). Does not touch the in-memory ledger.
    pub fn load(&self) -> Ledger {
        load_or_default(&self.path)
    }

    /// Strict read of the backing file.
    pub fn read_persisted(&self) -> LedgerResult<Ledger> {
        read_persisted(&self.path)
    }

    /// Replaces the whole ledger, on disk first and then in memory.
    pub fn save(&self, ledger: Ledger) -> LedgerResult<()> {
        let mut guard = self.ledger.lock();
        write_atomic(&self.path, &encode(&ledger)?)?;
        *guard = ledger;
        tracing::debug!(path = %self.path.display(), "Affiliate data saved");
        Ok(())
    }

    /// Copy of the in-memory ledger.
    pub fn snapshot(&self) -> Ledger {
        self.ledger.lock().clone()
    }

    /// Number of registered affiliates.
    pub fn len(&self) -> usize {
        self.ledger.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a new affiliate with an empty commission history.
    pub fn create_affiliate(&self) -> LedgerResult<String> {
        self.mutate(|ledger| {
            let mut id = Uuid::new_v4().to_string();
            while ledger.contains_key(&id) {
                id = Uuid::new_v4().to_string();
            }
            ledger.insert(id.clone(), AffiliateRecord::default());
            id
        })
        .inspect(|id| tracing::info!(affiliate_id = %id, "Generated new affiliate ID"))
    }

    /// Overwrites an affiliate's record wholesale.
    pub fn store_affiliate_data(&self, affiliate_id: &str, record: AffiliateRecord) -> LedgerResult<()> {
        if affiliate_id.is_empty() {
            return Err(LedgerError::invalid_input("Invalid affiliate_id"));
        }
        record.validate()?;
        self.mutate(|ledger| {
            ledger.insert(affiliate_id.to_string(), record);
        })?;
        tracing::info!(affiliate_id = %affiliate_id, "Stored data for affiliate");
        Ok(())
    }

    /// Returns the affiliate's record, if registered.
    pub fn get_affiliate_data(&self, affiliate_id: &str) -> Option<AffiliateRecord> {
        if affiliate_id.is_empty() {
            tracing::warn!("Invalid affiliate_id provided to get_affiliate_data");
            return None;
        }
        self.ledger.lock().get(affiliate_id).cloned()
    }

    /// Appends a commission stamped with the current server time.
    ///
    /// Returns `Ok(false)` without writing anything when the input is invalid
    /// or the affiliate is unknown. Errors only when the write itself fails.
    pub fn record_commission(&self, commission: &NewCommission) -> LedgerResult<bool> {
        if let Err(e) = commission.validate() {
            tracing::warn!(
                affiliate_id = %commission.affiliate_id,
                error = %e,
                "Rejected commission"
            );
            return Ok(false);
        }

        let mut guard = self.ledger.lock();
        if !guard.contains_key(&commission.affiliate_id) {
            tracing::warn!(affiliate_id = %commission.affiliate_id, "Affiliate ID not found");
            return Ok(false);
        }

        let mut next = guard.clone();
        if let Some(record) = next.get_mut(&commission.affiliate_id) {
            record
                .commissions
                .push(commission.clone().into_record(unix_now()));
        }
        write_atomic(&self.path, &encode(&next)?)?;
        *guard = next;
        drop(guard);

        tracing::info!(
            affiliate_id = %commission.affiliate_id,
            amount = commission.amount,
            commission = commission.commission,
            "Commission recorded"
        );
        Ok(true)
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Ledger) -> R) -> LedgerResult<R> {
        let mut guard = self.ledger.lock();
        let mut next = guard.clone();
        let out = f(&mut next);
        write_atomic(&self.path, &encode(&next)?)?;
        *guard = next;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommissionRecord;

    fn store_in(dir: &tempfile::TempDir) -> LedgerStore {
        LedgerStore::open(dir.path().join("affiliate_data.json"))
    }

    fn commission_for(id: &str) -> NewCommission {
        NewCommission {
            affiliate_id: id.to_string(),
            ico_id: "main_ico".into(),
            amount: 100.0,
            commission: 10.0,
            client_ip: "127.0.0.1".into(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn non_object_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("affiliate_data.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(read_persisted(&path).unwrap_err().is_malformed());
        assert!(LedgerStore::open(&path).is_empty());
    }

    #[test]
    fn garbage_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("affiliate_data.json");
        fs::write(&path, "{not json").unwrap();
        assert!(LedgerStore::open(&path).is_empty());
    }

    #[test]
    fn create_affiliate_persists_empty_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let id = store.create_affiliate().unwrap();

        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(store.get_affiliate_data(&id), Some(AffiliateRecord::default()));

        let on_disk: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk[&id], serde_json::json!({ "commissions": [] }));
    }

    #[test]
    fn created_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let a = store.create_affiliate().unwrap();
        let b = store.create_affiliate().unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn file_is_pretty_printed_with_four_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let id = store.create_affiliate().unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains(&format!("\n    \"{id}\": {{")));
    }

    #[test]
    fn record_commission_appends_with_server_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let id = store.create_affiliate().unwrap();

        let start = unix_now();
        assert!(store.record_commission(&commission_for(&id)).unwrap());
        let end = unix_now();

        let record = store.get_affiliate_data(&id).unwrap();
        assert_eq!(record.commissions.len(), 1);
        let entry = &record.commissions[0];
        assert_eq!(entry.ico_id, "main_ico");
        assert_eq!(entry.amount, 100.0);
        assert_eq!(entry.commission, 10.0);
        assert_eq!(entry.client_ip, "127.0.0.1");
        assert!(start <= entry.timestamp && entry.timestamp <= end);

        // Durable: a fresh store sees the same record.
        let reopened = LedgerStore::open(store.path());
        assert_eq!(reopened.get_affiliate_data(&id), Some(record));
    }

    #[test]
    fn record_commission_unknown_affiliate_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.create_affiliate().unwrap();
        let before = fs::read(store.path()).unwrap();

        assert!(!store.record_commission(&commission_for("missing")).unwrap());

        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert!(store.get_affiliate_data("missing").is_none());
    }

    #[test]
    fn record_commission_rejects_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let id = store.create_affiliate().unwrap();

        let mut c = commission_for(&id);
        c.amount = -5.0;
        assert!(!store.record_commission(&c).unwrap());

        let mut c = commission_for(&id);
        c.ico_id.clear();
        assert!(!store.record_commission(&c).unwrap());

        assert!(store.get_affiliate_data(&id).unwrap().commissions.is_empty());
    }

    #[test]
    fn store_affiliate_data_overwrites_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let record = AffiliateRecord {
            commissions: vec![CommissionRecord {
                ico_id: "ico".into(),
                amount: 50.0,
                commission: 5.0,
                client_ip: "10.0.0.1".into(),
                timestamp: 1_700_000_000,
            }],
            created_at: Some(1_700_000_000),
            last_updated: None,
        };

        store.store_affiliate_data("custom", record.clone()).unwrap();
        assert_eq!(store.get_affiliate_data("custom"), Some(record.clone()));
        assert_eq!(read_persisted(store.path()).unwrap()["custom"], record);
    }

    #[test]
    fn store_affiliate_data_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let err = store
            .store_affiliate_data("", AffiliateRecord::default())
            .unwrap_err();
        assert!(err.is_invalid_input());

        let bad = AffiliateRecord {
            commissions: vec![CommissionRecord {
                ico_id: "ico".into(),
                amount: 0.0,
                commission: 0.0,
                client_ip: "10.0.0.1".into(),
                timestamp: 0,
            }],
            ..Default::default()
        };
        assert!(store.store_affiliate_data("x", bad).unwrap_err().is_invalid_input());
        assert!(!store.path().exists());
    }

    #[test]
    fn get_affiliate_data_empty_id_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).get_affiliate_data("").is_none());
    }

    #[test]
    fn save_after_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let a = store.create_affiliate().unwrap();
        store.create_affiliate().unwrap();
        store.record_commission(&commission_for(&a)).unwrap();

        let loaded = store.load();
        store.save(loaded.clone()).unwrap();
        assert_eq!(store.load(), loaded);
        assert_eq!(store.snapshot(), loaded);
    }

    #[test]
    fn failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("ledger");
        let store = LedgerStore::open(sub.join("affiliate_data.json"));
        let id = store.create_affiliate().unwrap();

        // Replace the parent directory with a regular file so the next write fails.
        fs::remove_dir_all(&sub).unwrap();
        fs::write(&sub, b"in the way").unwrap();

        let err = store.record_commission(&commission_for(&id)).unwrap_err();
        assert!(matches!(err, LedgerError::Persistence { .. }));
        assert!(store.get_affiliate_data(&id).unwrap().commissions.is_empty());
    }
}

//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! `RocksDB` has no row versions of its own, so read-check-write sequences are
//! serialized in-process: entitlement writes take a per-user stripe lock and
//! purchase state changes take the purchase lock (always before a stripe).

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use gatmoney_core::{
    CreditPurchase, LedgerEntry, PaymentOutcome, PurchaseId, PurchaseStatus, Settlement,
    UserEntitlement, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{GrantOutcome, Store};

const LOCK_STRIPES: usize = 64;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    user_locks: Vec<Mutex<()>>,
    purchase_lock: Mutex<()>,
}

fn db_err(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn guard(lock: &Mutex<()>) -> Result<MutexGuard<'_, ()>> {
    lock.lock()
        .map_err(|_| StoreError::Database("rocks store lock poisoned".into()))
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(db),
            user_locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            purchase_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn user_lock(&self, user_id: &UserId) -> Result<MutexGuard<'_, ()>> {
        let stripe = usize::from(user_id.as_bytes()[15]) % LOCK_STRIPES;
        guard(&self.user_locks[stripe])
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read_entitlement(&self, user_id: &UserId) -> Result<Option<UserEntitlement>> {
        let cf = self.cf(cf::ENTITLEMENTS)?;
        self.db
            .get_cf(&cf, keys::entitlement_key(user_id))
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn read_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<CreditPurchase>> {
        let cf = self.cf(cf::PURCHASES)?;
        self.db
            .get_cf(&cf, keys::purchase_key(purchase_id))
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Check the stored version and stage the replacement into `batch`.
    /// The caller must hold the user's stripe lock.
    fn stage_swap(
        &self,
        batch: &mut WriteBatch,
        entitlement: &UserEntitlement,
        expected_version: u64,
    ) -> Result<UserEntitlement> {
        let current = self
            .read_entitlement(&entitlement.user_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "entitlement",
                id: entitlement.user_id.to_string(),
            })?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                user_id: entitlement.user_id.to_string(),
                expected: expected_version,
            });
        }

        let mut stored = entitlement.clone();
        stored.version = expected_version + 1;
        let cf = self.cf(cf::ENTITLEMENTS)?;
        batch.put_cf(
            &cf,
            keys::entitlement_key(&stored.user_id),
            Self::serialize(&stored)?,
        );
        Ok(stored)
    }

    fn stage_entry(&self, batch: &mut WriteBatch, entry: &LedgerEntry) -> Result<()> {
        let cf = self.cf(cf::LEDGER_ENTRIES)?;
        batch.put_cf(
            &cf,
            keys::entry_key(&entry.user_id, &entry.id),
            Self::serialize(entry)?,
        );
        Ok(())
    }

    /// Prefix keys in `cf_name`, newest first, after skipping `offset`.
    fn scan_user_prefix(
        &self,
        cf_name: &str,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let prefix = keys::user_prefix(user_id);

        let mut all = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            all.push((key, value));
        }

        // ULID suffixes sort oldest first.
        all.reverse();
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Entitlement Operations
    // =========================================================================

    async fn get_entitlement(&self, user_id: &UserId) -> Result<Option<UserEntitlement>> {
        self.read_entitlement(user_id)
    }

    async fn insert_entitlement(&self, entitlement: &UserEntitlement) -> Result<()> {
        let _lock = self.user_lock(&entitlement.user_id)?;
        if self.read_entitlement(&entitlement.user_id)?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "entitlement",
                id: entitlement.user_id.to_string(),
            });
        }
        let cf = self.cf(cf::ENTITLEMENTS)?;
        self.db
            .put_cf(
                &cf,
                keys::entitlement_key(&entitlement.user_id),
                Self::serialize(entitlement)?,
            )
            .map_err(db_err)
    }

    async fn compare_and_swap_entitlement(
        &self,
        entitlement: &UserEntitlement,
        expected_version: u64,
        entries: &[LedgerEntry],
    ) -> Result<UserEntitlement> {
        let _lock = self.user_lock(&entitlement.user_id)?;
        let mut batch = WriteBatch::default();
        let stored = self.stage_swap(&mut batch, entitlement, expected_version)?;
        for entry in entries {
            self.stage_entry(&mut batch, entry)?;
        }
        self.db.write(batch).map_err(db_err)?;
        Ok(stored)
    }

    async fn list_entries_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        self.scan_user_prefix(cf::LEDGER_ENTRIES, user_id, limit, offset)?
            .iter()
            .map(|(_, value)| Self::deserialize(value))
            .collect()
    }

    // =========================================================================
    // Purchase Operations
    // =========================================================================

    async fn insert_purchase(&self, purchase: &CreditPurchase) -> Result<()> {
        let _lock = guard(&self.purchase_lock)?;
        if self.read_purchase(&purchase.id)?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "purchase",
                id: purchase.id.to_string(),
            });
        }

        let cf_purchases = self.cf(cf::PURCHASES)?;
        let cf_by_user = self.cf(cf::PURCHASES_BY_USER)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_purchases,
            keys::purchase_key(&purchase.id),
            Self::serialize(purchase)?,
        );
        batch.put_cf(
            &cf_by_user,
            keys::user_purchase_key(&purchase.user_id, &purchase.id),
            [],
        );
        self.db.write(batch).map_err(db_err)
    }

    async fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<CreditPurchase>> {
        self.read_purchase(purchase_id)
    }

    async fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditPurchase>> {
        let mut purchases = Vec::new();
        for (key, _) in self.scan_user_prefix(cf::PURCHASES_BY_USER, user_id, limit, offset)? {
            let purchase_id = keys::extract_purchase_id_from_user_key(&key)?;
            if let Some(purchase) = self.read_purchase(&purchase_id)? {
                purchases.push(purchase);
            }
        }
        Ok(purchases)
    }

    async fn settle_purchase(
        &self,
        purchase_id: &PurchaseId,
        outcome: &PaymentOutcome,
        payment_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let _lock = guard(&self.purchase_lock)?;
        let current = self
            .read_purchase(purchase_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "purchase",
                id: purchase_id.to_string(),
            })?;

        let settlement = current.settle(outcome, payment_ref, now);
        if let Settlement::Applied(updated) = &settlement {
            let cf_purchases = self.cf(cf::PURCHASES)?;
            let mut batch = WriteBatch::default();
            batch.put_cf(
                &cf_purchases,
                keys::purchase_key(purchase_id),
                Self::serialize(updated)?,
            );
            if updated.needs_grant() {
                let cf_ungranted = self.cf(cf::UNGRANTED_PURCHASES)?;
                batch.put_cf(&cf_ungranted, keys::purchase_key(purchase_id), []);
            }
            self.db.write(batch).map_err(db_err)?;
        }
        Ok(settlement)
    }

    async fn grant_purchase(
        &self,
        purchase_id: &PurchaseId,
        entitlement: &UserEntitlement,
        expected_version: u64,
        entries: &[LedgerEntry],
        now: DateTime<Utc>,
    ) -> Result<GrantOutcome> {
        let _purchase_lock = guard(&self.purchase_lock)?;
        let mut purchase = self
            .read_purchase(purchase_id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "purchase",
                id: purchase_id.to_string(),
            })?;
        if purchase.credited_at.is_some() {
            return Ok(GrantOutcome::AlreadyCredited);
        }
        if purchase.status != PurchaseStatus::Completed {
            return Err(StoreError::InvalidState(format!(
                "purchase {purchase_id} is {}",
                purchase.status
            )));
        }

        let _user_lock = self.user_lock(&entitlement.user_id)?;
        let mut batch = WriteBatch::default();
        let stored = self.stage_swap(&mut batch, entitlement, expected_version)?;
        for entry in entries {
            self.stage_entry(&mut batch, entry)?;
        }

        purchase.credited_at = Some(now);
        let cf_purchases = self.cf(cf::PURCHASES)?;
        let cf_ungranted = self.cf(cf::UNGRANTED_PURCHASES)?;
        batch.put_cf(
            &cf_purchases,
            keys::purchase_key(purchase_id),
            Self::serialize(&purchase)?,
        );
        batch.delete_cf(&cf_ungranted, keys::purchase_key(purchase_id));

        self.db.write(batch).map_err(db_err)?;
        Ok(GrantOutcome::Granted(stored))
    }

    async fn list_ungranted_purchases(&self, limit: usize) -> Result<Vec<CreditPurchase>> {
        let cf = self.cf(cf::UNGRANTED_PURCHASES)?;
        let mut purchases = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            if purchases.len() >= limit {
                break;
            }
            let (key, _) = item.map_err(db_err)?;
            let purchase_id = keys::purchase_id_from_key(&key)?;
            if let Some(purchase) = self.read_purchase(&purchase_id)? {
                purchases.push(purchase);
            }
        }
        Ok(purchases)
    }
}

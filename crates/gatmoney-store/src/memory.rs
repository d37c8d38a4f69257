//! In-memory storage implementation.
//!
//! Everything lives behind one mutex, which makes every trait method trivially
//! atomic. Used by tests and by the service when no database is configured.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gatmoney_core::{
    CreditPurchase, EntryId, LedgerEntry, PaymentOutcome, PurchaseId, PurchaseStatus, Settlement,
    UserEntitlement, UserId,
};

use crate::error::{Result, StoreError};
use crate::{GrantOutcome, Store};

#[derive(Default)]
struct Inner {
    entitlements: HashMap<UserId, UserEntitlement>,
    entries: BTreeMap<(UserId, EntryId), LedgerEntry>,
    purchases: BTreeMap<PurchaseId, CreditPurchase>,
}

impl Inner {
    /// Version-checked replace. Does not touch entries.
    fn swap(
        &mut self,
        entitlement: &UserEntitlement,
        expected_version: u64,
    ) -> Result<UserEntitlement> {
        let current = self
            .entitlements
            .get_mut(&entitlement.user_id)
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
        *current = stored.clone();
        Ok(stored)
    }

    fn append(&mut self, entries: &[LedgerEntry]) {
        for entry in entries {
            self.entries
                .insert((entry.user_id, entry.id), entry.clone());
        }
    }
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

fn page<T>(items: impl DoubleEndedIterator<Item = T>, limit: usize, offset: usize) -> Vec<T> {
    items.rev().skip(offset).take(limit).collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_entitlement(&self, user_id: &UserId) -> Result<Option<UserEntitlement>> {
        Ok(self.lock()?.entitlements.get(user_id).cloned())
    }

    async fn insert_entitlement(&self, entitlement: &UserEntitlement) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.entitlements.contains_key(&entitlement.user_id) {
            return Err(StoreError::AlreadyExists {
                entity: "entitlement",
                id: entitlement.user_id.to_string(),
            });
        }
        inner
            .entitlements
            .insert(entitlement.user_id, entitlement.clone());
        Ok(())
    }

    async fn compare_and_swap_entitlement(
        &self,
        entitlement: &UserEntitlement,
        expected_version: u64,
        entries: &[LedgerEntry],
    ) -> Result<UserEntitlement> {
        let mut inner = self.lock()?;
        let stored = inner.swap(entitlement, expected_version)?;
        inner.append(entries);
        Ok(stored)
    }

    async fn list_entries_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let inner = self.lock()?;
        let range = (*user_id, EntryId::from_bytes([0; 16]))
            ..=(*user_id, EntryId::from_bytes([0xff; 16]));
        let owned = inner.entries.range(range).map(|(_, e)| e.clone());
        Ok(page(owned, limit, offset))
    }

    async fn insert_purchase(&self, purchase: &CreditPurchase) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.purchases.contains_key(&purchase.id) {
            return Err(StoreError::AlreadyExists {
                entity: "purchase",
                id: purchase.id.to_string(),
            });
        }
        inner.purchases.insert(purchase.id, purchase.clone());
        Ok(())
    }

    async fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<CreditPurchase>> {
        Ok(self.lock()?.purchases.get(purchase_id).cloned())
    }

    async fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditPurchase>> {
        let inner = self.lock()?;
        let owned = inner
            .purchases
            .values()
            .filter(|p| p.user_id == *user_id)
            .cloned();
        Ok(page(owned, limit, offset))
    }

    async fn settle_purchase(
        &self,
        purchase_id: &PurchaseId,
        outcome: &PaymentOutcome,
        payment_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let mut inner = self.lock()?;
        let slot = inner
            .purchases
            .get_mut(purchase_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "purchase",
                id: purchase_id.to_string(),
            })?;
        let settlement = slot.clone().settle(outcome, payment_ref, now);
        if let Settlement::Applied(updated) = &settlement {
            *slot = updated.clone();
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
        let mut inner = self.lock()?;
        let purchase = inner
            .purchases
            .get(purchase_id)
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

        let stored = inner.swap(entitlement, expected_version)?;
        inner.append(entries);
        if let Some(purchase) = inner.purchases.get_mut(purchase_id) {
            purchase.credited_at = Some(now);
        }
        Ok(GrantOutcome::Granted(stored))
    }

    async fn list_ungranted_purchases(&self, limit: usize) -> Result<Vec<CreditPurchase>> {
        let inner = self.lock()?;
        Ok(inner
            .purchases
            .values()
            .filter(|p| p.needs_grant())
            .take(limit)
            .cloned()
            .collect())
    }
}

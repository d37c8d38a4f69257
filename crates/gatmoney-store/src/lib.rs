//! Storage layer for GATMONEY.
//!
//! This crate persists entitlements, ledger entries and credit purchases
//! behind the async [`Store`] trait. Every entitlement write is a
//! compare-and-swap on the row's `version`, so concurrent writers for one
//! user serialize without holding a lock across external calls.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, the production backend
//! - [`MemoryStore`]: a single mutex around hash maps, for tests and local runs
//! - `RocksStore`: `RocksDB` with column families (feature `rocksdb-backend`)
//!
//! # Example
//!
//! ```no_run
//! use gatmoney_core::{UserEntitlement, UserId};
//! use gatmoney_store::{MemoryStore, Store};
//!
//! # async fn run() -> gatmoney_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! let today = chrono::Utc::now().date_naive();
//! store.insert_entitlement(&UserEntitlement::new(user_id, today)).await?;
//!
//! let entitlement = store.get_entitlement(&user_id).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod pg;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use pg::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatmoney_core::{
    CreditPurchase, LedgerEntry, PaymentOutcome, PurchaseId, Settlement, UserEntitlement, UserId,
};

/// Result of [`Store::grant_purchase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// Credits were added; carries the entitlement as stored.
    Granted(UserEntitlement),
    /// The purchase had already been credited. Nothing was written.
    AlreadyCredited,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (PostgreSQL, `RocksDB`, in-memory for testing).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Entitlement Operations
    // =========================================================================

    /// Get the entitlement for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_entitlement(&self, user_id: &UserId) -> Result<Option<UserEntitlement>>;

    /// Insert a new entitlement record as given (version included).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the user already has one.
    async fn insert_entitlement(&self, entitlement: &UserEntitlement) -> Result<()>;

    /// Replace the entitlement if its stored version is still `expected_version`,
    /// and append `entries` in the same atomic write.
    ///
    /// The stored record gets `version = expected_version + 1`; it is returned.
    ///
    /// # Errors
    ///
    /// - `StoreError::VersionConflict` if the row moved since it was read.
    /// - `StoreError::NotFound` if there is no row for the user.
    async fn compare_and_swap_entitlement(
        &self,
        entitlement: &UserEntitlement,
        expected_version: u64,
        entries: &[LedgerEntry],
    ) -> Result<UserEntitlement>;

    /// List ledger entries for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_entries_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Purchase Operations
    // =========================================================================

    /// Insert a new purchase record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` on a duplicate ID.
    async fn insert_purchase(&self, purchase: &CreditPurchase) -> Result<()>;

    /// Get a purchase by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<CreditPurchase>>;

    /// List a user's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditPurchase>>;

    /// Move a Pending purchase to its terminal state.
    ///
    /// A purchase that is already terminal is left untouched and returned as
    /// [`Settlement::AlreadySettled`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the purchase doesn't exist.
    async fn settle_purchase(
        &self,
        purchase_id: &PurchaseId,
        outcome: &PaymentOutcome,
        payment_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Settlement>;

    /// Credit a completed purchase exactly once.
    ///
    /// In one atomic write: marks the purchase `credited_at = now` (only if it
    /// was still uncredited), compare-and-swaps the entitlement (already
    /// carrying the added credits) against `expected_version`, and appends
    /// `entries`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the purchase doesn't exist.
    /// - `StoreError::InvalidState` if the purchase is not Completed.
    /// - `StoreError::VersionConflict` if the entitlement moved.
    async fn grant_purchase(
        &self,
        purchase_id: &PurchaseId,
        entitlement: &UserEntitlement,
        expected_version: u64,
        entries: &[LedgerEntry],
        now: DateTime<Utc>,
    ) -> Result<GrantOutcome>;

    /// List Completed purchases whose credits were never granted, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ungranted_purchases(&self, limit: usize) -> Result<Vec<CreditPurchase>>;
}

//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Entitlement records, keyed by `user_id`.
    pub const ENTITLEMENTS: &str = "entitlements";

    /// Ledger entries, keyed by `user_id || entry_id` so a prefix scan
    /// yields one user's entries in time order.
    pub const LEDGER_ENTRIES: &str = "ledger_entries";

    /// Credit purchases, keyed by `purchase_id` (ULID).
    pub const PURCHASES: &str = "purchases";

    /// Index: purchases by user, keyed by `user_id || purchase_id`.
    /// Value is empty (index only).
    pub const PURCHASES_BY_USER: &str = "purchases_by_user";

    /// Index: Completed purchases not yet credited, keyed by `purchase_id`.
    /// Value is empty (index only).
    pub const UNGRANTED_PURCHASES: &str = "ungranted_purchases";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ENTITLEMENTS,
        cf::LEDGER_ENTRIES,
        cf::PURCHASES,
        cf::PURCHASES_BY_USER,
        cf::UNGRANTED_PURCHASES,
    ]
}

//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in column families.

use gatmoney_core::{EntryId, PurchaseId, UserId};

use crate::error::{Result, StoreError};

/// Create an entitlement key from a user ID.
#[must_use]
pub fn entitlement_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a ledger entry key.
///
/// Format: `user_id (16 bytes) || entry_id (16 bytes)`
///
/// Since ULIDs are time-ordered, entries for a user will be sorted by time.
#[must_use]
pub fn entry_key(user_id: &UserId, entry_id: &EntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Create a purchase key from a purchase ID.
#[must_use]
pub fn purchase_key(purchase_id: &PurchaseId) -> Vec<u8> {
    purchase_id.to_bytes().to_vec()
}

/// Create a user-purchase index key.
///
/// Format: `user_id (16 bytes) || purchase_id (16 bytes)`
#[must_use]
pub fn user_purchase_key(user_id: &UserId, purchase_id: &PurchaseId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&purchase_id.to_bytes());
    key
}

/// Create a prefix for iterating all keys belonging to a user.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the purchase ID from a user-purchase index key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is not 32 bytes.
pub fn extract_purchase_id_from_user_key(key: &[u8]) -> Result<PurchaseId> {
    let bytes: [u8; 16] = key
        .get(16..32)
        .and_then(|tail| tail.try_into().ok())
        .ok_or_else(|| StoreError::Serialization(format!("bad index key length {}", key.len())))?;
    Ok(PurchaseId::from_bytes(bytes))
}

/// Decode a purchase ID from a bare purchase key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is not 16 bytes.
pub fn purchase_id_from_key(key: &[u8]) -> Result<PurchaseId> {
    let bytes: [u8; 16] = key
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("bad purchase key length {}", key.len())))?;
    Ok(PurchaseId::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entitlement_key_length() {
        let user_id = UserId::generate();
        assert_eq!(entitlement_key(&user_id).len(), 16);
    }

    #[test]
    fn entry_key_is_user_prefixed() {
        let user_id = UserId::generate();
        let entry_id = EntryId::generate();
        let key = entry_key(&user_id, &entry_id);

        assert_eq!(key.len(), 32);
        assert!(key.starts_with(&user_prefix(&user_id)));
        assert_eq!(&key[16..], entry_id.to_bytes());
    }

    #[test]
    fn extract_purchase_id_roundtrip() {
        let user_id = UserId::generate();
        let purchase_id = PurchaseId::generate();
        let key = user_purchase_key(&user_id, &purchase_id);

        assert_eq!(extract_purchase_id_from_user_key(&key).unwrap(), purchase_id);
        assert_eq!(
            purchase_id_from_key(&purchase_key(&purchase_id)).unwrap(),
            purchase_id
        );
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(extract_purchase_id_from_user_key(&[0; 20]).is_err());
        assert!(purchase_id_from_key(&[0; 3]).is_err());
    }
}

//! Error types for GATMONEY storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Its identifier.
        id: String,
    },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Its identifier.
        id: String,
    },

    /// The entitlement row changed since it was read.
    #[error("entitlement for {user_id} changed concurrently (expected version {expected})")]
    VersionConflict {
        /// The user whose row moved.
        user_id: String,
        /// The version the writer read.
        expected: u64,
    },

    /// A write was refused because the record is in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

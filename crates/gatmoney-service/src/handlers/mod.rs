//! API handlers.

pub mod admin;
pub mod entitlements;
pub mod generate;
pub mod health;
pub mod purchases;
pub mod usage;
pub mod webhooks;

use serde::Deserialize;

/// Pagination query parameters shared by list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Maximum number of items to return (default: 50, capped at 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl ListQuery {
    /// The limit actually applied.
    #[must_use]
    pub fn capped_limit(&self) -> usize {
        self.limit.min(100)
    }
}

//! PostgreSQL storage implementation.
//!
//! Entitlement writes are `UPDATE ... WHERE version = $n`; multi-row writes
//! (entitlement + ledger entries, purchase grant) run in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;

use gatmoney_core::{
    CreditPurchase, LedgerEntry, PaymentOutcome, PurchaseId, PurchaseQuantity, PurchaseStatus,
    ResourceType, Settlement, Tier, UserEntitlement, UserId, VideoSeconds,
};

use crate::error::{Result, StoreError};
use crate::{GrantOutcome, Store};

const ENTITLEMENT_COLUMNS: &str = "user_id, tier, scans_used_this_period, \
    reports_used_this_period, included_images_used, included_video_used_ms, \
    period_anchor_date, image_credits, video_seconds_credits_ms, version, created_at, updated_at";

const ENTRY_COLUMNS: &str =
    "id, user_id, kind, image_delta, video_delta_ms, description, metadata, created_at";

const PURCHASE_COLUMNS: &str = "id, user_id, resource, quantity, amount_charged_cents, \
    payment_method, status, external_payment_ref, failure_reason, credited_at, created_at, \
    settled_at";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Get the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_entitlement(
        conn: &mut PgConnection,
        user_id: &UserId,
    ) -> Result<Option<UserEntitlement>> {
        let sql = format!("SELECT {ENTITLEMENT_COLUMNS} FROM entitlements WHERE user_id = $1");
        sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_optional(conn)
            .await?
            .map(|row| entitlement_from_row(&row))
            .transpose()
    }

    /// Version-guarded update. Returns the stored record, or the reason it was refused.
    async fn swap_entitlement(
        conn: &mut PgConnection,
        entitlement: &UserEntitlement,
        expected_version: u64,
    ) -> Result<UserEntitlement> {
        let mut stored = entitlement.clone();
        stored.version = expected_version + 1;

        let updated = sqlx::query(
            r"
            UPDATE entitlements SET
                tier = $2,
                scans_used_this_period = $3,
                reports_used_this_period = $4,
                included_images_used = $5,
                included_video_used_ms = $6,
                period_anchor_date = $7,
                image_credits = $8,
                video_seconds_credits_ms = $9,
                version = $10,
                updated_at = $11
            WHERE user_id = $1 AND version = $12
            ",
        )
        .bind(stored.user_id.as_uuid())
        .bind(stored.tier.as_str())
        .bind(i64::from(stored.scans_used_this_period))
        .bind(i64::from(stored.reports_used_this_period))
        .bind(i64::from(stored.included_images_used))
        .bind(stored.included_video_used.as_millis())
        .bind(stored.period_anchor_date)
        .bind(stored.image_credits)
        .bind(stored.video_seconds_credits.as_millis())
        .bind(to_i64(stored.version)?)
        .bind(stored.updated_at)
        .bind(to_i64(expected_version)?)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(stored);
        }
        let exists = sqlx::query("SELECT 1 FROM entitlements WHERE user_id = $1")
            .bind(entitlement.user_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?
            .is_some();
        if exists {
            Err(StoreError::VersionConflict {
                user_id: entitlement.user_id.to_string(),
                expected: expected_version,
            })
        } else {
            Err(StoreError::NotFound {
                entity: "entitlement",
                id: entitlement.user_id.to_string(),
            })
        }
    }

    async fn insert_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<()> {
        let sql = format!(
            "INSERT INTO ledger_entries ({ENTRY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&sql)
            .bind(entry.id.to_string())
            .bind(entry.user_id.as_uuid())
            .bind(entry.kind.as_str())
            .bind(entry.image_delta)
            .bind(entry.video_delta_millis)
            .bind(&entry.description)
            .bind(Json(&entry.metadata))
            .bind(entry.created_at)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn fetch_purchase_for_update(
        conn: &mut PgConnection,
        purchase_id: &PurchaseId,
    ) -> Result<CreditPurchase> {
        let sql =
            format!("SELECT {PURCHASE_COLUMNS} FROM credit_purchases WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(purchase_id.to_string())
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "purchase",
                id: purchase_id.to_string(),
            })?;
        purchase_from_row(&row)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_entitlement(&self, user_id: &UserId) -> Result<Option<UserEntitlement>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_entitlement(&mut *conn, user_id).await
    }

    async fn insert_entitlement(&self, entitlement: &UserEntitlement) -> Result<()> {
        let sql = format!(
            "INSERT INTO entitlements ({ENTITLEMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (user_id) DO NOTHING"
        );
        let inserted = sqlx::query(&sql)
            .bind(entitlement.user_id.as_uuid())
            .bind(entitlement.tier.as_str())
            .bind(i64::from(entitlement.scans_used_this_period))
            .bind(i64::from(entitlement.reports_used_this_period))
            .bind(i64::from(entitlement.included_images_used))
            .bind(entitlement.included_video_used.as_millis())
            .bind(entitlement.period_anchor_date)
            .bind(entitlement.image_credits)
            .bind(entitlement.video_seconds_credits.as_millis())
            .bind(to_i64(entitlement.version)?)
            .bind(entitlement.created_at)
            .bind(entitlement.updated_at)
            .execute(&self.pool)
            .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                entity: "entitlement",
                id: entitlement.user_id.to_string(),
            });
        }
        Ok(())
    }

    async fn compare_and_swap_entitlement(
        &self,
        entitlement: &UserEntitlement,
        expected_version: u64,
        entries: &[LedgerEntry],
    ) -> Result<UserEntitlement> {
        let mut tx = self.pool.begin().await?;
        let stored = Self::swap_entitlement(&mut *tx, entitlement, expected_version).await?;
        for entry in entries {
            Self::insert_entry(&mut *tx, entry).await?;
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn list_entries_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE user_id = $1 \
             ORDER BY id DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(to_i64(limit)?)
            .bind(to_i64(offset)?)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(entry_from_row)
            .collect()
    }

    async fn insert_purchase(&self, purchase: &CreditPurchase) -> Result<()> {
        let sql = format!(
            "INSERT INTO credit_purchases ({PURCHASE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (id) DO NOTHING"
        );
        let inserted = sqlx::query(&sql)
            .bind(purchase.id.to_string())
            .bind(purchase.user_id.as_uuid())
            .bind(purchase.resource().as_str())
            .bind(purchase.quantity.raw_amount())
            .bind(purchase.amount_charged_cents)
            .bind(&purchase.payment_method)
            .bind(purchase.status.as_str())
            .bind(&purchase.external_payment_ref)
            .bind(&purchase.failure_reason)
            .bind(purchase.credited_at)
            .bind(purchase.created_at)
            .bind(purchase.settled_at)
            .execute(&self.pool)
            .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                entity: "purchase",
                id: purchase.id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<CreditPurchase>> {
        let sql = format!("SELECT {PURCHASE_COLUMNS} FROM credit_purchases WHERE id = $1");
        sqlx::query(&sql)
            .bind(purchase_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| purchase_from_row(&row))
            .transpose()
    }

    async fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditPurchase>> {
        let sql = format!(
            "SELECT {PURCHASE_COLUMNS} FROM credit_purchases WHERE user_id = $1 \
             ORDER BY id DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(to_i64(limit)?)
            .bind(to_i64(offset)?)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(purchase_from_row)
            .collect()
    }

    async fn settle_purchase(
        &self,
        purchase_id: &PurchaseId,
        outcome: &PaymentOutcome,
        payment_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Settlement> {
        let mut tx = self.pool.begin().await?;
        let current = Self::fetch_purchase_for_update(&mut *tx, purchase_id).await?;
        let settlement = current.settle(outcome, payment_ref, now);

        if let Settlement::Applied(updated) = &settlement {
            sqlx::query(
                r"
                UPDATE credit_purchases
                SET status = $2, external_payment_ref = $3, failure_reason = $4, settled_at = $5
                WHERE id = $1 AND status = 'pending'
                ",
            )
            .bind(updated.id.to_string())
            .bind(updated.status.as_str())
            .bind(&updated.external_payment_ref)
            .bind(&updated.failure_reason)
            .bind(updated.settled_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let purchase = Self::fetch_purchase_for_update(&mut *tx, purchase_id).await?;
        if purchase.credited_at.is_some() {
            return Ok(GrantOutcome::AlreadyCredited);
        }
        if purchase.status != PurchaseStatus::Completed {
            return Err(StoreError::InvalidState(format!(
                "purchase {purchase_id} is {}",
                purchase.status
            )));
        }

        let stored = Self::swap_entitlement(&mut *tx, entitlement, expected_version).await?;
        sqlx::query("UPDATE credit_purchases SET credited_at = $2 WHERE id = $1")
            .bind(purchase_id.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        for entry in entries {
            Self::insert_entry(&mut *tx, entry).await?;
        }
        tx.commit().await?;
        Ok(GrantOutcome::Granted(stored))
    }

    async fn list_ungranted_purchases(&self, limit: usize) -> Result<Vec<CreditPurchase>> {
        let sql = format!(
            "SELECT {PURCHASE_COLUMNS} FROM credit_purchases \
             WHERE status = 'completed' AND credited_at IS NULL ORDER BY id LIMIT $1"
        );
        sqlx::query(&sql)
            .bind(to_i64(limit)?)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(purchase_from_row)
            .collect()
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn to_i64<T: TryInto<i64>>(value: T) -> Result<i64> {
    value
        .try_into()
        .map_err(|_| StoreError::Serialization("integer out of range for BIGINT".into()))
}

fn counter(row: &PgRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{column} out of range: {value}")))
}

fn entitlement_from_row(row: &PgRow) -> Result<UserEntitlement> {
    let tier: String = row.try_get("tier")?;
    let version: i64 = row.try_get("version")?;
    Ok(UserEntitlement {
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        tier: tier
            .parse::<Tier>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        scans_used_this_period: counter(row, "scans_used_this_period")?,
        reports_used_this_period: counter(row, "reports_used_this_period")?,
        included_images_used: counter(row, "included_images_used")?,
        included_video_used: VideoSeconds::from_millis(row.try_get("included_video_used_ms")?),
        period_anchor_date: row.try_get("period_anchor_date")?,
        image_credits: row.try_get("image_credits")?,
        video_seconds_credits: VideoSeconds::from_millis(row.try_get("video_seconds_credits_ms")?),
        version: u64::try_from(version)
            .map_err(|_| StoreError::Serialization(format!("negative version: {version}")))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let Json(metadata) = row.try_get::<Json<serde_json::Value>, _>("metadata")?;
    Ok(LedgerEntry {
        id: id
            .parse()
            .map_err(|e: gatmoney_core::IdError| StoreError::Serialization(e.to_string()))?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        kind: kind.parse().map_err(StoreError::Serialization)?,
        image_delta: row.try_get("image_delta")?,
        video_delta_millis: row.try_get("video_delta_ms")?,
        description: row.try_get("description")?,
        metadata,
        created_at: row.try_get("created_at")?,
    })
}

fn purchase_from_row(row: &PgRow) -> Result<CreditPurchase> {
    let id: String = row.try_get("id")?;
    let resource: String = row.try_get("resource")?;
    let status: String = row.try_get("status")?;
    let resource = match resource.as_str() {
        "image" => ResourceType::Image,
        "video" => ResourceType::Video,
        other => {
            return Err(StoreError::Serialization(format!(
                "unknown purchase resource: {other}"
            )))
        }
    };
    Ok(CreditPurchase {
        id: id
            .parse()
            .map_err(|e: gatmoney_core::IdError| StoreError::Serialization(e.to_string()))?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        quantity: PurchaseQuantity::from_raw(resource, row.try_get("quantity")?),
        amount_charged_cents: row.try_get("amount_charged_cents")?,
        payment_method: row.try_get("payment_method")?,
        status: status
            .parse::<PurchaseStatus>()
            .map_err(StoreError::Serialization)?,
        external_payment_ref: row.try_get("external_payment_ref")?,
        failure_reason: row.try_get("failure_reason")?,
        credited_at: row.try_get("credited_at")?,
        created_at: row.try_get("created_at")?,
        settled_at: row.try_get("settled_at")?,
    })
}

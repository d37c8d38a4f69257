//! Entitlement orchestration.
//!
//! The [`Ledger`] is the only writer of entitlements. Every change follows the
//! same shape:
//!
//! 1. load the user's row (creating a Free-tier row on first sight),
//! 2. roll the period forward if the date changed,
//! 3. apply the change to a copy,
//! 4. compare-and-swap it back together with its ledger entries.
//!
//! A lost compare-and-swap reloads and retries, so two requests for the same
//! user serialize while requests for different users never wait on each other.
//! No store lock is held while an external call is in flight.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use gatmoney_core::{
    maybe_reset_period, Charge, Consumption, CreditPurchase, EntitlementError, LedgerEntry,
    PaymentOutcome, PeriodLength, PricingConfig, PurchaseId, PurchaseQuantity, PurchaseStatus,
    Settlement, Tier, TierPolicy, UserEntitlement, UserId,
};
use gatmoney_store::{GrantOutcome, Store, StoreError};

use crate::clock::{Clock, SystemClock};
use crate::payments::{PaymentError, PaymentProvider, PaymentSession};

/// Attempts at a compare-and-swap before giving up.
pub const MAX_CAS_ATTEMPTS: u32 = 8;

/// Grants retried at once by [`Ledger::reconcile_grants`].
const RECONCILE_CONCURRENCY: usize = 4;

/// Default bound on an external generation call.
pub const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Error type for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A domain rule refused the operation.
    #[error(transparent)]
    Entitlement(#[from] EntitlementError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every compare-and-swap attempt lost to a concurrent writer.
    #[error("entitlement for {user_id} still contended after {attempts} attempts")]
    Contention {
        /// The contended user.
        user_id: UserId,
        /// Attempts made.
        attempts: u32,
    },

    /// No purchase with this ID.
    #[error("purchase not found: {0}")]
    PurchaseNotFound(PurchaseId),

    /// No payment provider is configured.
    #[error("payments are not configured")]
    PaymentsUnavailable,

    /// The payment provider refused to start the charge.
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Outcome of [`Ledger::reconcile_grants`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Purchases looked at.
    pub examined: usize,
    /// Purchases credited by this run.
    pub granted: usize,
    /// Purchases that still could not be credited.
    pub failed: Vec<PurchaseId>,
}

/// Serializes entitlement changes per user.
pub struct Ledger {
    store: Arc<dyn Store>,
    policy: TierPolicy,
    pricing: PricingConfig,
    period: PeriodLength,
    clock: Arc<dyn Clock>,
    external_timeout: Duration,
    payments: Option<Arc<dyn PaymentProvider>>,
}

impl Ledger {
    /// Create a ledger with default pricing, the system clock and no payments.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, policy: TierPolicy, period: PeriodLength) -> Self {
        Self {
            store,
            policy,
            pricing: PricingConfig::default(),
            period,
            clock: Arc::new(SystemClock),
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
            payments: None,
        }
    }

    /// Use `pricing` for purchase quotes.
    #[must_use]
    pub fn with_pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = pricing;
        self
    }

    /// Use `clock` for dates and timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound external calls made through [`Ledger::charge_on_success`].
    #[must_use]
    pub const fn with_external_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    /// Start purchases through `payments`.
    #[must_use]
    pub fn with_payments(mut self, payments: Arc<dyn PaymentProvider>) -> Self {
        self.payments = Some(payments);
        self
    }

    /// The tier policy in force.
    #[must_use]
    pub const fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    /// The configured period length.
    #[must_use]
    pub const fn period(&self) -> PeriodLength {
        self.period
    }

    /// Whether purchases can be started.
    #[must_use]
    pub fn has_payments(&self) -> bool {
        self.payments.is_some()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Load a user's entitlement, creating a Free-tier record on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn load_or_create(&self, user_id: &UserId) -> Result<UserEntitlement> {
        if let Some(existing) = self.store.get_entitlement(user_id).await? {
            return Ok(existing);
        }

        let now = self.clock.now();
        let mut fresh = UserEntitlement::new(*user_id, now.date_naive());
        fresh.created_at = now;
        fresh.updated_at = now;

        match self.store.insert_entitlement(&fresh).await {
            Ok(()) => {
                tracing::info!(user_id = %user_id, "Created entitlement");
                Ok(fresh)
            }
            // Another request created it first.
            Err(StoreError::AlreadyExists { .. }) => self
                .store
                .get_entitlement(user_id)
                .await?
                .ok_or_else(|| {
                    StoreError::NotFound {
                        entity: "entitlement",
                        id: user_id.to_string(),
                    }
                    .into()
                }),
            Err(e) => Err(e.into()),
        }
    }

    /// The entitlement as of today, with any pending period reset applied.
    ///
    /// A user seen for the first time gets a Free-tier row inserted. An
    /// existing row is not written; the reset is persisted by the next change.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn current(&self, user_id: &UserId) -> Result<UserEntitlement> {
        let mut entitlement = self.load_or_create(user_id).await?;
        maybe_reset_period(&mut entitlement, self.clock.today(), self.period);
        Ok(entitlement)
    }

    /// Whether `consumption` would be allowed right now. Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::QuotaExceeded`] if it would be refused.
    pub async fn check(&self, user_id: &UserId, consumption: Consumption) -> Result<Charge> {
        let mut entitlement = self.current(user_id).await?;
        Ok(consumption.apply(&mut entitlement, &self.policy)?)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Roll a freshly loaded record into today's period.
    fn stage(
        &self,
        current: &UserEntitlement,
        today: NaiveDate,
    ) -> (UserEntitlement, Vec<LedgerEntry>) {
        let mut next = current.clone();
        let mut entries = Vec::new();
        if let Some(closed) = maybe_reset_period(&mut next, today, self.period) {
            tracing::debug!(
                user_id = %current.user_id,
                closed_anchor = %closed.anchor,
                scans_used = closed.scans_used,
                "Period rolled over"
            );
            entries.push(LedgerEntry::period_reset(current.user_id, &closed));
        }
        debug_assert!(next.is_current(today, self.period));
        (next, entries)
    }

    /// Apply `change` to the user's entitlement under compare-and-swap.
    ///
    /// `change` may run several times; it must only touch the record it is
    /// given. It returns a value for the caller and the entries to log.
    async fn update<T, F>(&self, user_id: &UserId, mut change: F) -> Result<(UserEntitlement, T)>
    where
        T: Send,
        F: FnMut(&mut UserEntitlement) -> gatmoney_core::Result<(T, Vec<LedgerEntry>)> + Send,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.load_or_create(user_id).await?;
            let now = self.clock.now();
            let (mut next, mut entries) = self.stage(&current, now.date_naive());

            let (value, mut produced) = change(&mut next)?;
            entries.append(&mut produced);
            stamp(&mut entries, now);
            next.updated_at = now;

            match self
                .store
                .compare_and_swap_entitlement(&next, current.version, &entries)
                .await
            {
                Ok(stored) => return Ok((stored, value)),
                Err(StoreError::VersionConflict { .. }) => {
                    tracing::debug!(
                        user_id = %user_id,
                        attempt,
                        "Entitlement changed concurrently, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            user_id = %user_id,
            attempts = MAX_CAS_ATTEMPTS,
            "Giving up on contended entitlement"
        );
        Err(LedgerError::Contention {
            user_id: *user_id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Atomically check and charge one consumption.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::QuotaExceeded`] with the record unchanged
    /// when the allowance is insufficient.
    pub async fn consume(
        &self,
        user_id: &UserId,
        consumption: Consumption,
    ) -> Result<(UserEntitlement, Charge)> {
        let policy = &self.policy;
        let (stored, charge) = self
            .update(user_id, |entitlement| {
                let charge = consumption.apply(entitlement, policy)?;
                Ok((charge, vec![LedgerEntry::consumption(entitlement.user_id, &charge)]))
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            resource = %charge.resource,
            from_allowance = charge.from_allowance,
            from_balance = charge.from_balance,
            version = stored.version,
            "Consumption charged"
        );

        Ok((stored, charge))
    }

    /// Run `call` and charge `consumption` only if it succeeds.
    ///
    /// The allowance is checked before `call` is first polled; when it is
    /// insufficient `call` never runs. A failed, timed-out or dropped call
    /// charges nothing. If a concurrent request used up the allowance while
    /// `call` was running, its result is withheld and `QuotaExceeded` is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`EntitlementError::QuotaExceeded`] before or after the call.
    /// - [`EntitlementError::ExternalCallFailed`] if `call` fails or times out.
    pub async fn charge_on_success<T, E, Fut>(
        &self,
        user_id: &UserId,
        consumption: Consumption,
        call: Fut,
    ) -> Result<(T, UserEntitlement, Charge)>
    where
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        E: Display + Send,
        T: Send,
    {
        self.check(user_id, consumption).await?;

        let value = match tokio::time::timeout(self.external_timeout, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "External call failed, nothing charged"
                );
                return Err(EntitlementError::ExternalCallFailed {
                    reason: e.to_string(),
                    timed_out: false,
                }
                .into());
            }
            Err(_) => {
                tracing::warn!(
                    user_id = %user_id,
                    timeout_ms = u64::try_from(self.external_timeout.as_millis()).unwrap_or(u64::MAX),
                    "External call timed out, nothing charged"
                );
                return Err(EntitlementError::ExternalCallFailed {
                    reason: format!(
                        "no response within {}s",
                        self.external_timeout.as_secs()
                    ),
                    timed_out: true,
                }
                .into());
            }
        };

        match self.consume(user_id, consumption).await {
            Ok((entitlement, charge)) => Ok((value, entitlement, charge)),
            Err(LedgerError::Entitlement(e @ EntitlementError::QuotaExceeded { .. })) => {
                tracing::warn!(
                    user_id = %user_id,
                    resource = %consumption.resource(),
                    "Allowance used up during the call, result withheld"
                );
                Err(e.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Move a user to another tier.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the row stays contended.
    pub async fn change_tier(
        &self,
        user_id: &UserId,
        tier: Tier,
        actor: &str,
    ) -> Result<(UserEntitlement, Tier)> {
        let (stored, previous) = self
            .update(user_id, |entitlement| {
                let previous = entitlement.change_tier(tier);
                let entries = if previous == tier {
                    Vec::new()
                } else {
                    vec![LedgerEntry::tier_changed(
                        entitlement.user_id,
                        previous,
                        tier,
                        actor,
                    )]
                };
                Ok((previous, entries))
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            from = %previous,
            to = %tier,
            actor = %actor,
            "Tier changed"
        );

        Ok((stored, previous))
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Quote, record and start a purchase.
    ///
    /// If the provider refuses to start, the purchase is settled as Failed.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PaymentsUnavailable`] without a payment provider.
    /// - [`EntitlementError::InvalidQuantity`] / `InvalidAmount` for a bad request.
    /// - [`LedgerError::Payment`] if the provider refuses.
    pub async fn initiate_purchase(
        &self,
        user_id: &UserId,
        quantity: PurchaseQuantity,
        payment_method: &str,
    ) -> Result<(CreditPurchase, PaymentSession)> {
        let payments = self
            .payments
            .as_ref()
            .ok_or(LedgerError::PaymentsUnavailable)?;

        let entitlement = self.current(user_id).await?;
        let amount_cents = self.pricing.quote(&quantity, entitlement.tier)?;

        let mut purchase =
            CreditPurchase::initiate(*user_id, quantity, amount_cents, payment_method)?;
        purchase.created_at = self.clock.now();
        self.store.insert_purchase(&purchase).await?;

        tracing::info!(
            user_id = %user_id,
            purchase_id = %purchase.id,
            quantity = %purchase.quantity,
            amount_cents,
            tier = %entitlement.tier,
            "Purchase initiated"
        );

        match payments.start_payment(&purchase).await {
            Ok(session) => Ok((purchase, session)),
            Err(e) => {
                tracing::warn!(
                    purchase_id = %purchase.id,
                    error = %e,
                    "Payment could not be started"
                );
                let outcome = PaymentOutcome::Failed {
                    reason: Some(format!("payment not started: {e}")),
                };
                if let Err(settle_err) = self
                    .store
                    .settle_purchase(&purchase.id, &outcome, "not_started", self.clock.now())
                    .await
                {
                    tracing::error!(
                        purchase_id = %purchase.id,
                        error = %settle_err,
                        "Failed to mark unstarted purchase as failed"
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Apply a payment outcome and grant the credits if it completed the purchase.
    ///
    /// A repeated or contradictory confirmation for a purchase that is already
    /// terminal changes nothing; a completed purchase whose grant failed earlier
    /// is granted now.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PurchaseNotFound`] for an unknown ID.
    /// - [`EntitlementError::CreditGrantFailure`] if the grant fails.
    pub async fn settle_purchase(
        &self,
        purchase_id: &PurchaseId,
        outcome: &PaymentOutcome,
        payment_ref: &str,
    ) -> Result<CreditPurchase> {
        let settlement = match self
            .store
            .settle_purchase(purchase_id, outcome, payment_ref, self.clock.now())
            .await
        {
            Ok(settlement) => settlement,
            Err(StoreError::NotFound { .. }) => {
                return Err(LedgerError::PurchaseNotFound(*purchase_id))
            }
            Err(e) => return Err(e.into()),
        };

        let purchase = match settlement {
            Settlement::Applied(purchase) => {
                tracing::info!(
                    purchase_id = %purchase_id,
                    user_id = %purchase.user_id,
                    status = %purchase.status,
                    payment_ref = %payment_ref,
                    "Purchase settled"
                );
                purchase
            }
            Settlement::AlreadySettled(purchase) => {
                let reported = match outcome {
                    PaymentOutcome::Succeeded => PurchaseStatus::Completed,
                    PaymentOutcome::Failed { .. } => PurchaseStatus::Failed,
                };
                if purchase.status == reported
                    && purchase.external_payment_ref.as_deref() == Some(payment_ref)
                {
                    tracing::debug!(purchase_id = %purchase_id, "Duplicate payment confirmation");
                } else {
                    tracing::warn!(
                        purchase_id = %purchase_id,
                        status = %purchase.status,
                        reported = %reported,
                        payment_ref = %payment_ref,
                        "Purchase confirmation mismatch, ignoring"
                    );
                }
                purchase
            }
        };

        if purchase.needs_grant() {
            return self.grant(purchase).await;
        }
        Ok(purchase)
    }

    /// Grant a completed purchase's credits if that hasn't happened yet.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PurchaseNotFound`] for an unknown ID.
    /// - [`EntitlementError::CreditGrantFailure`] if the grant fails.
    pub async fn grant_purchase(&self, purchase_id: &PurchaseId) -> Result<CreditPurchase> {
        let purchase = self
            .store
            .get_purchase(purchase_id)
            .await?
            .ok_or(LedgerError::PurchaseNotFound(*purchase_id))?;

        if !purchase.needs_grant() {
            return Ok(purchase);
        }
        self.grant(purchase).await
    }

    async fn grant(&self, mut purchase: CreditPurchase) -> Result<CreditPurchase> {
        match self.try_grant(&purchase).await {
            Ok(Some((entitlement, credited_at))) => {
                tracing::info!(
                    purchase_id = %purchase.id,
                    user_id = %purchase.user_id,
                    quantity = %purchase.quantity,
                    image_credits = entitlement.image_credits,
                    video_seconds_credits = %entitlement.video_seconds_credits,
                    "Purchase credited"
                );
                purchase.credited_at = Some(credited_at);
                Ok(purchase)
            }
            Ok(None) => {
                tracing::debug!(purchase_id = %purchase.id, "Purchase already credited");
                let id = purchase.id;
                Ok(self.store.get_purchase(&id).await?.unwrap_or(purchase))
            }
            Err(e) => {
                tracing::error!(
                    alert = "credit_grant_failure",
                    purchase_id = %purchase.id,
                    user_id = %purchase.user_id,
                    quantity = %purchase.quantity,
                    error = %e,
                    "Completed purchase could not be credited"
                );
                Err(EntitlementError::CreditGrantFailure {
                    purchase_id: purchase.id,
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    /// One compare-and-swap grant loop. `None` means someone else granted it.
    async fn try_grant(
        &self,
        purchase: &CreditPurchase,
    ) -> Result<Option<(UserEntitlement, DateTime<Utc>)>> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.load_or_create(&purchase.user_id).await?;
            let now = self.clock.now();
            let (mut next, mut entries) = self.stage(&current, now.date_naive());

            purchase.grant_to(&mut next)?;
            entries.push(LedgerEntry::purchase_granted(purchase));
            stamp(&mut entries, now);
            next.updated_at = now;

            match self
                .store
                .grant_purchase(&purchase.id, &next, current.version, &entries, now)
                .await
            {
                Ok(GrantOutcome::Granted(stored)) => return Ok(Some((stored, now))),
                Ok(GrantOutcome::AlreadyCredited) => return Ok(None),
                Err(StoreError::VersionConflict { .. }) => {
                    tracing::debug!(
                        purchase_id = %purchase.id,
                        attempt,
                        "Entitlement changed during grant, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::Contention {
            user_id: purchase.user_id,
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Retry the grant for completed purchases that were never credited.
    ///
    /// # Errors
    ///
    /// Returns an error only if the purchases cannot be listed; individual
    /// grant failures are reported in [`ReconcileReport::failed`].
    pub async fn reconcile_grants(&self, limit: usize) -> Result<ReconcileReport> {
        let pending = self.store.list_ungranted_purchases(limit).await?;
        let mut report = ReconcileReport {
            examined: pending.len(),
            ..ReconcileReport::default()
        };

        let mut grants = stream::iter(pending)
            .map(|purchase| async move {
                let id = purchase.id;
                (id, self.grant(purchase).await)
            })
            .buffer_unordered(RECONCILE_CONCURRENCY);

        while let Some((id, result)) = grants.next().await {
            match result {
                Ok(_) => report.granted += 1,
                Err(_) => report.failed.push(id),
            }
        }

        tracing::info!(
            examined = report.examined,
            granted = report.granted,
            failed = report.failed.len(),
            "Grant reconciliation finished"
        );

        Ok(report)
    }
}

fn stamp(entries: &mut [LedgerEntry], now: DateTime<Utc>) {
    for entry in entries {
        entry.created_at = now;
    }
}

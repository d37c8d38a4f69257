//! Common test utilities for gatmoney integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

use gatmoney_core::{
    CreditPurchase, LedgerEntry, PaymentOutcome, PurchaseId, Settlement, Tier, UserEntitlement,
    UserId, VideoSeconds,
};
use gatmoney_service::crypto::sign_payload;
use gatmoney_service::{
    create_router, AppState, Clock, FixedClock, GeneratedAsset, GenerationError,
    GenerationProvider, GenerationRequest, PaymentError, PaymentProvider, PaymentSession,
    ServiceConfig,
};
use gatmoney_store::{GrantOutcome, MemoryStore, Store, StoreError};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// How the fake generation backend behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Succeed,
    Fail,
    Hang,
}

/// Generation backend double.
pub struct FakeGeneration {
    mode: Mutex<GenerationMode>,
    calls: AtomicUsize,
}

impl FakeGeneration {
    fn new() -> Self {
        Self {
            mode: Mutex::new(GenerationMode::Succeed),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: GenerationMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for FakeGeneration {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedAsset, GenerationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            GenerationMode::Succeed => Ok(GeneratedAsset {
                id: format!("asset_{n}"),
                output: serde_json::json!({ "kind": request.kind.as_str() }),
            }),
            GenerationMode::Fail => Err(GenerationError::Api {
                status: 500,
                message: "model crashed".into(),
            }),
            GenerationMode::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                unreachable!("generation timeout should fire first")
            }
        }
    }
}

/// Payment provider double that always starts the charge.
pub struct FakePayments;

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn start_payment(
        &self,
        purchase: &CreditPurchase,
    ) -> Result<PaymentSession, PaymentError> {
        Ok(PaymentSession {
            payment_ref: format!("pay_{}", purchase.id),
            redirect_url: Some(format!("https://pay.example/checkout/{}", purchase.id)),
        })
    }
}

/// Store that delegates to a `MemoryStore` but can be told to fail grants.
pub struct FailingGrants {
    inner: Arc<MemoryStore>,
    failures: AtomicUsize,
}

impl FailingGrants {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Store for FailingGrants {
    async fn get_entitlement(
        &self,
        user_id: &UserId,
    ) -> gatmoney_store::Result<Option<UserEntitlement>> {
        self.inner.get_entitlement(user_id).await
    }

    async fn insert_entitlement(&self, ent: &UserEntitlement) -> gatmoney_store::Result<()> {
        self.inner.insert_entitlement(ent).await
    }

    async fn compare_and_swap_entitlement(
        &self,
        ent: &UserEntitlement,
        expected_version: u64,
        entries: &[LedgerEntry],
    ) -> gatmoney_store::Result<UserEntitlement> {
        self.inner
            .compare_and_swap_entitlement(ent, expected_version, entries)
            .await
    }

    async fn list_entries_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> gatmoney_store::Result<Vec<LedgerEntry>> {
        self.inner.list_entries_by_user(user_id, limit, offset).await
    }

    async fn insert_purchase(&self, purchase: &CreditPurchase) -> gatmoney_store::Result<()> {
        self.inner.insert_purchase(purchase).await
    }

    async fn get_purchase(
        &self,
        purchase_id: &PurchaseId,
    ) -> gatmoney_store::Result<Option<CreditPurchase>> {
        self.inner.get_purchase(purchase_id).await
    }

    async fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> gatmoney_store::Result<Vec<CreditPurchase>> {
        self.inner.list_purchases_by_user(user_id, limit, offset).await
    }

    async fn settle_purchase(
        &self,
        purchase_id: &PurchaseId,
        outcome: &PaymentOutcome,
        payment_ref: &str,
        now: DateTime<Utc>,
    ) -> gatmoney_store::Result<Settlement> {
        self.inner
            .settle_purchase(purchase_id, outcome, payment_ref, now)
            .await
    }

    async fn grant_purchase(
        &self,
        purchase_id: &PurchaseId,
        ent: &UserEntitlement,
        expected_version: u64,
        entries: &[LedgerEntry],
        now: DateTime<Utc>,
    ) -> gatmoney_store::Result<GrantOutcome> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Database("connection reset".into()));
        }
        self.inner
            .grant_purchase(purchase_id, ent, expected_version, entries, now)
            .await
    }

    async fn list_ungranted_purchases(
        &self,
        limit: usize,
    ) -> gatmoney_store::Result<Vec<CreditPurchase>> {
        self.inner.list_ungranted_purchases(limit).await
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server.
    pub store: Arc<MemoryStore>,
    /// The server's view of `store`, able to fail grants on demand.
    pub grants: Arc<FailingGrants>,
    /// The clock the service reads.
    pub clock: Arc<FixedClock>,
    /// The generation backend double.
    pub generation: Arc<FakeGeneration>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh store, starting at noon on 2026-03-01.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Like [`TestHarness::new`], with the service config adjusted by `adjust`.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let generation = Arc::new(FakeGeneration::new());

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            payment_webhook_secret: Some(WEBHOOK_SECRET.into()),
            generation_timeout_seconds: 1,
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let grants = Arc::new(FailingGrants::new(store.clone()));

        let state = AppState::from_parts(
            grants.clone(),
            config,
            clock.clone(),
            Some(generation.clone()),
            Some(Arc::new(FakePayments)),
        );
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            grants,
            clock,
            generation,
            test_user_id: UserId::generate(),
        }
    }

    /// Make the next `count` credit grants fail with a database error.
    pub fn fail_next_grants(&self, count: usize) {
        self.grants.failures.store(count, Ordering::SeqCst);
    }

    /// Get the authorization header for the test user.
    pub fn user_auth_header(&self) -> String {
        Self::auth_header_for(&self.test_user_id)
    }

    /// Get an authorization header for any user.
    pub fn auth_header_for(user_id: &UserId) -> String {
        let claims = serde_json::json!({
            "sub": user_id.to_string(),
            "aud": "gatmoney",
            "exp": Utc::now().timestamp() + 3600,
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token");
        format!("Bearer {token}")
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        Self::auth_header_for(&UserId::generate())
    }

    /// Sign a webhook body the way the payment provider does.
    pub fn sign_webhook(body: &str) -> String {
        sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), body)
    }

    /// Give the test user purchased balances directly in the store.
    pub async fn seed_balances(&self, tier: Tier, image_credits: i64, video: VideoSeconds) {
        let today = self.clock.today();
        let mut ent = match self.store.get_entitlement(&self.test_user_id).await.unwrap() {
            Some(ent) => ent,
            None => {
                let ent = gatmoney_core::UserEntitlement::new(self.test_user_id, today);
                self.store.insert_entitlement(&ent).await.unwrap();
                ent
            }
        };
        let version = ent.version;
        ent.tier = tier;
        ent.image_credits = image_credits;
        ent.video_seconds_credits = video;
        self.store
            .compare_and_swap_entitlement(&ent, version, &[])
            .await
            .unwrap();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

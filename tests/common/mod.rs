use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use greenspace_api::{
    auth::{issue_token, UserRole},
    config::AppConfig,
    db,
    entities::plant,
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{GatewayIntent, PaymentProvider},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_webhook_secret";

/// Gateway stub: hands out deterministic intent ids and can be flipped
/// into an unavailable state to exercise the failure path.
pub struct StubPaymentProvider {
    counter: AtomicU64,
    unavailable: AtomicBool,
}

impl StubPaymentProvider {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    #[allow(dead_code)]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentProvider for StubPaymentProvider {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable(
                "stub gateway offline".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayIntent {
            id: format!("pi_test_{}", n),
            client_secret: format!("pi_test_{}_secret", n),
            amount_minor,
            currency: currency.to_string(),
        })
    }
}

/// Helper harness for spinning up an application state backed by an
/// in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub provider: Arc<StubPaymentProvider>,
    _event_task: tokio::task::JoinHandle<()>,
    db_file: Option<std::path::PathBuf>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = Self::base_config();
        cfg.database_url = "sqlite::memory:".to_string();
        // A single connection keeps the in-memory database alive for the
        // lifetime of the pool
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        Self::from_config(cfg, None).await
    }

    /// Like [`TestApp::new`], but backed by a throwaway database file
    /// with a multi-connection pool, so tests can run transactions
    /// concurrently. The file is removed when the harness drops.
    #[allow(dead_code)]
    pub async fn new_file_backed() -> Self {
        let path = std::env::temp_dir().join(format!("greenspace-test-{}.sqlite", Uuid::new_v4()));
        let mut cfg = Self::base_config();
        cfg.database_url = format!("sqlite://{}?mode=rwc", path.display());
        cfg.db_max_connections = 5;
        cfg.db_min_connections = 1;

        Self::from_config(cfg, Some(path)).await
    }

    fn base_config() -> AppConfig {
        let mut cfg: AppConfig =
            serde_json::from_str("{}").expect("default test config deserializes");
        cfg.identity_jwt_secret = TEST_JWT_SECRET.to_string();
        cfg.payment_webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());
        cfg.environment = "test".to_string();
        cfg
    }

    async fn from_config(cfg: AppConfig, db_file: Option<std::path::PathBuf>) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let provider = Arc::new(StubPaymentProvider::new());
        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            provider.clone(),
            cfg.default_currency.clone(),
            cfg.intent_expiry_secs,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", greenspace_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            provider,
            _event_task: event_task,
            db_file,
        }
    }

    /// Bearer token for a buyer principal.
    pub fn buyer_token(&self, buyer_id: Uuid) -> String {
        issue_token(buyer_id, UserRole::Buyer, TEST_JWT_SECRET, 3600).expect("issue buyer token")
    }

    /// Bearer token for a vendor principal.
    #[allow(dead_code)]
    pub fn vendor_token(&self, vendor_id: Uuid) -> String {
        issue_token(vendor_id, UserRole::Vendor, TEST_JWT_SECRET, 3600).expect("issue vendor token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Raw-body request with custom headers, used for webhook tests where
    /// the signature covers the exact bytes.
    #[allow(dead_code)]
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        builder = builder.header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder
            .body(Body::from(body.to_string()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Seed a catalog entry.
    pub async fn seed_plant(
        &self,
        name: &str,
        price: Decimal,
        vendor_id: Uuid,
        in_stock: bool,
    ) -> plant::Model {
        plant::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            in_stock: Set(in_stock),
            vendor_id: Set(vendor_id),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed plant for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        if let Some(path) = &self.db_file {
            for suffix in ["", "-wal", "-shm"] {
                let mut name = path.as_os_str().to_os_string();
                name.push(suffix);
                let _ = std::fs::remove_file(name);
            }
        }
    }
}

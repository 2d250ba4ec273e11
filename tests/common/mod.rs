//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};

use balance_ledger::api::middleware::ServiceKey;
use balance_ledger::api::{self, AppState};
use balance_ledger::jobs::{MemoryJobQueue, ResetAllProducer, RetryPolicy};
use balance_ledger::store::MemoryStore;
use balance_ledger::{Ledger, LedgerConfig};

/// Credential the in-memory app expects on /accounts routes
pub const SERVICE_KEY: &str = "test-service-key";

/// Router over in-memory backends, with handles to both for assertions
pub struct TestApp {
    pub router: Router,
    pub ledger: Ledger<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
}

pub fn memory_app() -> TestApp {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()), LedgerConfig::default());
    let queue = Arc::new(MemoryJobQueue::new());
    let producer = ResetAllProducer::new(Arc::clone(&queue), RetryPolicy::default());

    let router = api::create_router(AppState {
        ledger: ledger.clone(),
        producer,
        min_transaction_amount: Decimal::from(10),
        service_key: ServiceKey::new(SERVICE_KEY),
    });

    TestApp {
        router,
        ledger,
        queue,
    }
}

/// Connect to the test database, or `None` when DATABASE_URL is unset or
/// unreachable. Migrations are applied on first use.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = match PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("skipping database test, cannot connect: {e}");
            return None;
        }
    };

    balance_ledger::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}

/// Database tests share the accounts table and reset touches every row,
/// so they run one at a time
pub async fn db_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::const_new(());
    LOCK.lock().await
}

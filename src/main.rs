//! balance_ledger - User Balance Ledger Service
//!
//! Serves balance mutations and transfers over HTTP, backed by Postgres,
//! and runs the queued "reset all balances" worker in the same process.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

use balance_ledger::api::{self, AppState};
use balance_ledger::jobs::{PgJobQueue, QueueMaintenance, ResetAllProducer, ResetWorker};
use balance_ledger::store::PgStore;
use balance_ledger::{db, telemetry, Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    telemetry::init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        environment = %config.environment,
        production = config.is_production(),
        "Starting balance_ledger server"
    );
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config).await?;
    db::verify_connection(&pool).await?;

    if config.run_migrations {
        db::run_migrations(&pool).await?;
    }

    // Verify database schema
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let store = Arc::new(PgStore::new(pool.clone(), config.unit_timeout));
    let ledger = Ledger::new(store, config.ledger());
    let queue = Arc::new(PgJobQueue::new(pool.clone()));
    let producer = ResetAllProducer::new(Arc::clone(&queue), config.retry_policy());

    // Background tasks stop when the shutdown flag flips
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ResetWorker::new(ledger.clone(), Arc::clone(&queue), config.worker())
        .start(shutdown_rx.clone());
    let maintenance =
        QueueMaintenance::new(Arc::clone(&queue), config.maintenance()).start(shutdown_rx);

    let app = api::create_router(AppState {
        ledger,
        producer,
        min_transaction_amount: config.min_transaction_amount,
        service_key: config.service_key.clone(),
    });

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    shutdown_tx.send(true).ok();
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Reset worker ended abnormally");
    }
    if let Err(e) = maintenance.await {
        tracing::error!(error = %e, "Queue maintenance ended abnormally");
    }

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

//! API Routes
//!
//! HTTP endpoint definitions. Handlers validate input, call the ledger or
//! the reset producer, and shape the response; they hold no logic of their
//! own.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Extension, Path, Query, State,
    },
    http::StatusCode,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::domain::pagination::{DEFAULT_LIMIT, DEFAULT_PAGE};
use crate::domain::{
    Account, AccountId, Amount, DomainError, OperationContext, TransactionRecord, TransferRecords,
};
use crate::error::{AppError, AppResult};
use crate::jobs::{Job, JobId, JobQueue, JobStatus};
use crate::ledger::{ClosedAccount, TransactionPage};
use crate::store::LedgerStore;

use super::middleware::{logging_middleware, require_service_key, require_user, RequestUser};
use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

/// Amount as sent by clients: a JSON string or number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    fn to_decimal(&self) -> Result<Decimal, AppError> {
        let raw = match self {
            AmountInput::Text(text) => text.trim().to_string(),
            AmountInput::Number(number) => number.to_string(),
        };
        Decimal::from_str(&raw)
            .map_err(|_| AppError::InvalidRequest(format!("amount '{raw}' is not a decimal number")))
    }
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: AmountInput,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub page: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: AccountId,
    pub balance: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetAcceptedResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub id: AccountId,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the application router
pub fn create_router<S, Q>(state: AppState<S, Q>) -> Router
where
    S: LedgerStore,
    Q: JobQueue,
{
    // Every balance route acts on behalf of the calling user
    let balance_routes = Router::new()
        .route("/add", post(add::<S, Q>))
        .route("/subtract", post(subtract::<S, Q>))
        .route("/transfer/:recipient_id", post(transfer::<S, Q>))
        .route("/transactions", get(list_transactions::<S, Q>))
        .route("/", get(get_balance::<S, Q>))
        .route("/reset-all-to-zero", post(reset_all_to_zero::<S, Q>))
        .route("/jobs/:job_id", get(get_job::<S, Q>))
        .route_layer(middleware::from_fn(require_user));

    // Account lifecycle, driven by the user subsystem with the service key
    let account_routes = Router::new()
        .route("/", post(open_account::<S, Q>))
        .route("/:id", delete(close_account::<S, Q>))
        .route_layer(middleware::from_fn_with_state(
            state.service_key.clone(),
            require_service_key,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/balance", balance_routes)
        .nest("/accounts", account_routes)
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn amount_from(request: Result<Json<AmountRequest>, JsonRejection>, minimum: Decimal) -> AppResult<Amount> {
    let Json(request) = request.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let value = request.amount.to_decimal()?;
    Amount::at_least(value, minimum).map_err(|e| DomainError::from(e).into())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

// =========================================================================
// Balance mutations
// =========================================================================

/// POST /balance/add
async fn add<S: LedgerStore, Q: JobQueue>(
    State(state): State<AppState<S, Q>>,
    Extension(context): Extension<OperationContext>,
    Extension(user): Extension<RequestUser>,
    body: Result<Json<AmountRequest>, JsonRejection>,
) -> AppResult<Json<TransactionRecord>> {
    let amount = amount_from(body, state.min_transaction_amount)?;
    let record = state
        .ledger
        .add(user.user_id, amount)
        .instrument(context.span("add"))
        .await?;
    Ok(Json(record))
}

/// POST /balance/subtract
async fn subtract<S: LedgerStore, Q: JobQueue>(
    State(state): State<AppState<S, Q>>,
    Extension(context): Extension<OperationContext>,
    Extension(user): Extension<RequestUser>,
    body: Result<Json<AmountRequest>, JsonRejection>,
) -> AppResult<Json<TransactionRecord>> {
    let amount = amount_from(body, state.min_transaction_amount)?;
    let record = state
        .ledger
        .subtract(user.user_id, amount)
        .instrument(context.span("subtract"))
        .await?;
    Ok(Json(record))
}

/// POST /balance/transfer/:recipient_id
async fn transfer<S: LedgerStore, Q: JobQueue>(
    State(state): State<AppState<S, Q>>,
    Extension(context): Extension<OperationContext>,
    Extension(user): Extension<RequestUser>,
    recipient: Result<Path<AccountId>, PathRejection>,
    body: Result<Json<AmountRequest>, JsonRejection>,
) -> AppResult<Json<TransferRecords>> {
    let Path(recipient_id) = recipient.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let amount = amount_from(body, state.min_transaction_amount)?;
    let records = state
        .ledger
        .transfer(user.user_id, recipient_id, amount)
        .instrument(context.span("transfer"))
        .await?;
    Ok(Json(records))
}

// =========================================================================
// Reads
// =========================================================================

/// GET /balance/transactions?limit=&page=
async fn list_transactions<S: LedgerStore, Q: JobQueue>(
    State(state): State<AppState<S, Q>>,
    Extension(context): Extension<OperationContext>,
    Extension(user): Extension<RequestUser>,
    query: Result<Query<TransactionsQuery>, QueryRejection>,
) -> AppResult<Json<TransactionPage>> {
    let Query(query) = query.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let page = state
        .ledger
        .list_transactions(
            user.user_id,
            query.limit.unwrap_or(DEFAULT_LIMIT),
            query.page.unwrap_or(DEFAULT_PAGE),
        )
        .instrument(context.span("list_transactions"))
        .await?;
    Ok(Json(page))
}

/// GET /balance
async fn get_balance<S: LedgerStore, Q: JobQueue>(
    State(state): State<AppState<S, Q>>,
    Extension(context): Extension<OperationContext>,
    Extension(user): Extension<RequestUser>,
) -> AppResult<Json<BalanceResponse>> {
    let account = state
        .ledger
        .balance(user.user_id)
        .instrument(context.span("balance"))
        .await?;
    Ok(Json(BalanceResponse {
        user_id: account.id,
        balance: account.balance,
    }))
}

// =========================================================================
// Bulk reset
// =========================================================================

/// POST /balance/reset-all-to-zero
async fn reset_all_to_zero<S: LedgerStore, Q: JobQueue>(
    State(state): State<AppState<S, Q>>,
    Extension(context): Extension<OperationContext>,
    Extension(user): Extension<RequestUser>,
) -> AppResult<(StatusCode, Json<ResetAcceptedResponse>)> {
    let job = state.producer.enqueue_reset_all().await?;
    tracing::info!(
        job_id = %job.id,
        requested_by = user.user_id,
        correlation_id = %context.correlation_id,
        "reset of all balances requested"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(ResetAcceptedResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /balance/jobs/:job_id
async fn get_job<S: LedgerStore, Q: JobQueue>(
    State(state): State<AppState<S, Q>>,
    job_id: Result<Path<JobId>, PathRejection>,
) -> AppResult<Json<Job>> {
    let Path(job_id) = job_id.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let job = state
        .producer
        .job(job_id)
        .await?
        .ok_or(AppError::JobNotFound(job_id))?;
    Ok(Json(job))
}

// =========================================================================
// Account lifecycle
// =========================================================================

/// POST /accounts
async fn open_account<S: LedgerStore, Q: JobQueue>(
    State(state): State<AppState<S, Q>>,
    Extension(context): Extension<OperationContext>,
    body: Result<Json<OpenAccountRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Account>)> {
    let Json(request) = body.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let account = state
        .ledger
        .open_account(request.id)
        .instrument(context.span("open_account"))
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// DELETE /accounts/:id
async fn close_account<S: LedgerStore, Q: JobQueue>(
    State(state): State<AppState<S, Q>>,
    Extension(context): Extension<OperationContext>,
    id: Result<Path<AccountId>, PathRejection>,
) -> AppResult<Json<ClosedAccount>> {
    let Path(id) = id.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let closed = state
        .ledger
        .close_account(id)
        .instrument(context.span("close_account"))
        .await?;
    Ok(Json(closed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_input_forms() {
        let text: AmountRequest = serde_json::from_str(r#"{"amount": "12.50"}"#).unwrap();
        assert_eq!(text.amount.to_decimal().unwrap(), dec!(12.50));

        let number: AmountRequest = serde_json::from_str(r#"{"amount": 40}"#).unwrap();
        assert_eq!(number.amount.to_decimal().unwrap(), dec!(40));

        let bad: AmountRequest = serde_json::from_str(r#"{"amount": "ten"}"#).unwrap();
        assert!(matches!(bad.amount.to_decimal(), Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn test_amount_minimum_applies() {
        let body = Ok(Json(AmountRequest {
            amount: AmountInput::Text("9.99".to_string()),
        }));
        let err = amount_from(body, dec!(10)).unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::InvalidAmount(_))));

        let body = Ok(Json(AmountRequest {
            amount: AmountInput::Text("-5".to_string()),
        }));
        let err = amount_from(body, dec!(10)).unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::NegativeAmount(_))));
    }
}

//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use rust_decimal::Decimal;

use crate::jobs::ResetAllProducer;
use middleware::ServiceKey;
use crate::ledger::Ledger;

pub use routes::create_router;

/// Shared handler state
pub struct AppState<S, Q> {
    pub ledger: Ledger<S>,
    pub producer: ResetAllProducer<Q>,
    /// Smallest amount accepted on balance routes
    pub min_transaction_amount: Decimal,
    /// Credential for the account lifecycle routes
    pub service_key: ServiceKey,
}

impl<S, Q> Clone for AppState<S, Q> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            producer: self.producer.clone(),
            min_transaction_amount: self.min_transaction_amount,
            service_key: self.service_key.clone(),
        }
    }
}

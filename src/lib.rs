//! balance_ledger Library
//!
//! User balance ledger: atomic add, subtract and transfer over a mutable
//! balance aggregate and an immutable transaction log, plus a queued bulk
//! reset of all balances.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use domain::{Amount, AmountError, DomainError, OperationContext};
pub use error::{AppError, AppResult};
pub use ledger::{Ledger, LedgerConfig, LedgerError};

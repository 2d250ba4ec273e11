//! Operation Context
//!
//! Identifies the request a ledger call belongs to. Handlers enter
//! [`OperationContext::span`] around each call, so coordinator and store
//! logs carry the correlation id of the request that caused them.

use serde::{Deserialize, Serialize};
use tracing::Span;
use uuid::Uuid;

use super::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub correlation_id: Uuid,

    /// Caller named by X-Request-User-Id, absent on account lifecycle routes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_user_id: Option<AccountId>,
}

impl OperationContext {
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            request_user_id: None,
        }
    }

    /// Context for work no request started, such as a queued reset
    pub fn detached() -> Self {
        Self::new(Uuid::new_v4())
    }

    pub fn with_request_user(mut self, user_id: AccountId) -> Self {
        self.request_user_id = Some(user_id);
        self
    }

    pub fn span(&self, operation: &'static str) -> Span {
        tracing::info_span!(
            "ledger",
            operation,
            correlation_id = %self.correlation_id,
            request_user_id = self.request_user_id,
        )
    }
}

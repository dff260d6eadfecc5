//! Business error taxonomy for the withdrawal saga.
//!
//! Errors are structurally distinguished so the orchestrator can branch
//! deterministically on the kind, never on message text. Three families
//! matter:
//!
//! - **Precondition violations** (`PreconditionFailed`): the withdrawal is
//!   not at a legal step for the requested operation - an ordering or replay
//!   problem, surfaced to the caller as a bad request.
//! - **Business failures** (`NotEnoughFunds`, `BankTransfer`,
//!   `CouldNotTransfer`): expected outcomes that drive state transitions,
//!   never crashes.
//! - **Infrastructure failures** (`Storage`, `NotificationDelivery`): logged
//!   and retried or tolerated; the in-flight withdrawal keeps its step.

use crate::step::WithdrawalStep;
use crate::types::{Money, PlanAccountId, UserId, WithdrawalId};
use thiserror::Error;

/// Errors produced by withdrawal operations and collaborator ports.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WithdrawalError {
    /// The account does not hold enough available funds for the debit
    #[error(
        "not enough funds in account {account_id}: requested {requested}, available {available}"
    )]
    NotEnoughFunds {
        /// Account that was checked
        account_id: PlanAccountId,
        /// Amount the withdrawal asked for
        requested: Money,
        /// Funds available for withdrawal at check time
        available: Money,
    },

    /// The bank rejected or could not accept the transfer instruction
    #[error("bank transfer failed: {reason}")]
    BankTransfer {
        /// Bank-provided or gateway-derived reason
        reason: String,
    },

    /// The transfer could not be carried out after being accepted
    #[error("could not transfer: {reason}")]
    CouldNotTransfer {
        /// Bank-provided reason from the asynchronous callback
        reason: String,
    },

    /// No such user
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// No such account for the user
    #[error("account {0} not found")]
    AccountNotFound(PlanAccountId),

    /// No such withdrawal for the (user, account) pair
    #[error("withdrawal {0} not found")]
    WithdrawalNotFound(WithdrawalId),

    /// The withdrawal is not at a step where this operation is legal
    ///
    /// This is the idempotency boundary: duplicate or out-of-order events
    /// land here instead of mutating state twice.
    #[error("withdrawal {withdrawal_id} is at step {actual}; expected one of {expected:?}")]
    PreconditionFailed {
        /// Withdrawal that was targeted
        withdrawal_id: WithdrawalId,
        /// Step the withdrawal is actually at
        actual: WithdrawalStep,
        /// Steps the operation would have accepted
        expected: Vec<WithdrawalStep>,
    },

    /// The request itself is malformed (e.g., zero amount)
    #[error("invalid withdrawal request: {0}")]
    InvalidRequest(String),

    /// The withdrawal store failed
    #[error("storage failure: {0}")]
    Storage(String),

    /// The notification transport failed
    #[error("notification delivery failed: {0}")]
    NotificationDelivery(String),
}

impl WithdrawalError {
    /// Expected business outcome rather than an operational fault
    ///
    /// Business failures are converted into state transitions by the saga;
    /// they are never re-thrown past the orchestrator.
    #[must_use]
    pub const fn is_business(&self) -> bool {
        matches!(
            self,
            Self::NotEnoughFunds { .. } | Self::BankTransfer { .. } | Self::CouldNotTransfer { .. }
        )
    }

    /// The not-enough-funds branch, which short-circuits the saga
    #[must_use]
    pub const fn is_insufficient_funds(&self) -> bool {
        matches!(self, Self::NotEnoughFunds { .. })
    }

    /// Worth retrying with backoff
    ///
    /// A `WithdrawalNotFound` can be a read racing against a just-created
    /// record; `Storage` can be transient. Everything else is deterministic.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::WithdrawalNotFound(_) | Self::Storage(_))
    }
}

//! The withdrawal state machine.
//!
//! ```text
//! CREATED ──► DEBITING ──► SENDING_TO_BANK ──► RECEIVED_BANK_RESPONSE ──► COMPLETED
//!                │                │                      │
//!                │                └──────────┐           │
//!                ├──► INSUFFICIENT_FUNDS     ▼           ▼
//!                │           │          ROLLING_BACK ◄───┘
//!                ▼           ▼               │
//!              FAILED ◄──────┴───────────────┘
//! ```
//!
//! `Created` is initial; `Completed` and `Failed` are terminal. Every
//! mutating operation asserts the withdrawal currently sits at a legal step
//! via [`assert_step`]; a violation is a [`WithdrawalError::PreconditionFailed`]
//! naming actual vs. expected steps. This guard - not external locking - is
//! what rejects duplicate or out-of-order event delivery.

use crate::error::WithdrawalError;
use crate::types::Withdrawal;
use serde::{Deserialize, Serialize};

/// The saga step a withdrawal currently sits at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WithdrawalStep {
    /// Withdrawal record exists; nothing has happened yet
    Created,
    /// Debit against the ledger is in flight
    Debiting,
    /// Debit committed; bank transfer issued or about to be, awaiting the
    /// bank's asynchronous response
    SendingToBank,
    /// The bank's callback arrived; outcome not yet applied
    ReceivedBankResponse,
    /// A committed debit must be returned to the account
    RollingBack,
    /// The debit was rejected for lack of available funds
    InsufficientFunds,
    /// Terminal: money left for the bank and the bank confirmed it
    Completed,
    /// Terminal: the withdrawal did not happen; any debit was credited back
    Failed,
}

/// All steps, in documentation order
pub const ALL_STEPS: [WithdrawalStep; 8] = [
    WithdrawalStep::Created,
    WithdrawalStep::Debiting,
    WithdrawalStep::SendingToBank,
    WithdrawalStep::ReceivedBankResponse,
    WithdrawalStep::RollingBack,
    WithdrawalStep::InsufficientFunds,
    WithdrawalStep::Completed,
    WithdrawalStep::Failed,
];

impl WithdrawalStep {
    /// No further business transition is defined from this step
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine defines a direct transition `self -> next`
    ///
    /// Same-step "transitions" are not in the relation; step retries append
    /// history entries without changing the step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Debiting)
                | (
                    Self::Debiting,
                    Self::SendingToBank | Self::InsufficientFunds | Self::Failed
                )
                | (
                    Self::SendingToBank,
                    Self::ReceivedBankResponse | Self::RollingBack
                )
                | (
                    Self::ReceivedBankResponse,
                    Self::Completed | Self::RollingBack
                )
                | (Self::RollingBack, Self::Failed)
                | (Self::InsufficientFunds, Self::Failed)
        )
    }

    /// Steps from which `target` is directly reachable
    #[must_use]
    pub fn predecessors(target: Self) -> Vec<Self> {
        ALL_STEPS
            .into_iter()
            .filter(|step| step.can_transition_to(target))
            .collect()
    }

    /// Wire/metric label for this step
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Debiting => "DEBITING",
            Self::SendingToBank => "SENDING_TO_BANK",
            Self::ReceivedBankResponse => "RECEIVED_BANK_RESPONSE",
            Self::RollingBack => "ROLLING_BACK",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for WithdrawalStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Asserts the withdrawal currently sits at one of the allowed steps
///
/// # Errors
///
/// Returns [`WithdrawalError::PreconditionFailed`] naming the actual step
/// and the allowed set. The caller must not have performed any side effect
/// before this guard.
pub fn assert_step(
    withdrawal: &Withdrawal,
    allowed: &[WithdrawalStep],
) -> Result<(), WithdrawalError> {
    if allowed.contains(&withdrawal.step) {
        Ok(())
    } else {
        Err(WithdrawalError::PreconditionFailed {
            withdrawal_id: withdrawal.id.clone(),
            actual: withdrawal.step,
            expected: allowed.to_vec(),
        })
    }
}

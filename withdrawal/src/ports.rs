//! Collaborator ports consumed by the withdrawal saga.
//!
//! The saga drives four external collaborators, each behind a dyn-compatible
//! trait: the account ledger, the bank gateway, the notification sink, and
//! the withdrawal record store. The bank's asynchronous answer is not part of
//! the gateway trait - it arrives out-of-band as a `BankResponseReceived`
//! action injected into the saga store (a webhook at the transport boundary).
//!
//! Traits return explicit `Pin<Box<dyn Future>>` instead of `async fn` so
//! they can be used as trait objects (`Arc<dyn AccountLedger>`) inside the
//! effect system.

use crate::error::WithdrawalError;
use crate::step::WithdrawalStep;
use crate::types::{
    BankAccountId, BankTransactionId, BankTransferStatus, Money, NotificationRecord,
    PlanAccount, PlanAccountId, StepHistoryEntry, UserId, Withdrawal, WithdrawalId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Future type returned by port methods
pub type PortFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, WithdrawalError>> + Send + 'a>>;

/// Account ledger port: the only place balances change.
///
/// `check_and_debit` and `credit_back` must be atomic per `(user, account)`
/// key; read-modify-write races between concurrent withdrawals on the same
/// account are the ledger's problem, not the saga's. Both operations move
/// `cash_available_for_withdrawal` AND `cash_balance` symmetrically, so a
/// debit followed by a credit-back is exactly balance-neutral.
pub trait AccountLedger: Send + Sync {
    /// Fetch an account.
    ///
    /// Fails with `UserNotFound` / `AccountNotFound` when the key does not
    /// resolve.
    fn get(&self, user_id: UserId, account_id: PlanAccountId) -> PortFuture<'_, PlanAccount>;

    /// Atomically verify available funds and debit both balance fields.
    ///
    /// Fails with `NotEnoughFunds` when
    /// `cash_available_for_withdrawal < amount`; in that case nothing is
    /// debited.
    fn check_and_debit(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        amount: Money,
    ) -> PortFuture<'_, PlanAccount>;

    /// Credit a previously debited amount back to both balance fields.
    ///
    /// The inverse of `check_and_debit`. This is the single compensation
    /// primitive; callers never adjust balances any other way.
    fn credit_back(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        amount: Money,
    ) -> PortFuture<'_, PlanAccount>;
}

/// Bank gateway port: one fire-and-forget transfer instruction.
///
/// The gateway deduplicates by withdrawal id, so re-issuing the instruction
/// for the same withdrawal (event redelivery) is safe. The result of the
/// transfer arrives later through the bank callback.
pub trait BankGateway: Send + Sync {
    /// Instruct the bank to transfer `amount` to `bank_account_id`.
    ///
    /// Fails with `BankTransfer` when the instruction is not accepted.
    fn initiate_transfer(
        &self,
        user_id: UserId,
        bank_account_id: BankAccountId,
        withdrawal_id: WithdrawalId,
        amount: Money,
    ) -> PortFuture<'_, ()>;
}

/// Notification sink port: best-effort user messaging.
///
/// Callers swallow errors from this port; a failed notification never blocks
/// or rolls back a withdrawal.
pub trait NotificationSink: Send + Sync {
    /// Tell the user their withdrawal completed.
    ///
    /// Fails with `NotificationDelivery` when the transport rejects the
    /// message.
    fn notify_success(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> PortFuture<'_, ()>;

    /// Tell the user their withdrawal failed and why.
    ///
    /// Fails with `NotificationDelivery` when the transport rejects the
    /// message.
    fn notify_failure(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
        reason: String,
    ) -> PortFuture<'_, ()>;
}

/// Withdrawal record store port.
///
/// All operations are scoped by `(user, account, withdrawal)`. Updates go
/// through [`WithdrawalUpdate`], never ad-hoc partial merges, so each
/// operation states exactly which fields it may touch.
pub trait WithdrawalStore: Send + Sync {
    /// Persist a new withdrawal record.
    ///
    /// Fails with `Storage` when a record with the same id already exists.
    fn create(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal: Withdrawal,
    ) -> PortFuture<'_, Withdrawal>;

    /// Fetch a withdrawal record, `None` when absent.
    fn get_by_id(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> PortFuture<'_, Option<Withdrawal>>;

    /// Apply a validated field-level update and return the new record.
    ///
    /// Fails with `WithdrawalNotFound` when absent and with
    /// `PreconditionFailed` when the update's step change is not a legal
    /// transition from the record's current step.
    fn update(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
        update: WithdrawalUpdate,
    ) -> PortFuture<'_, Withdrawal>;
}

/// Explicit field-level update for a withdrawal record.
///
/// Each saga operation constructs exactly the update it is allowed to make;
/// there is no "merge whatever fields happen to be set" path. A step change
/// always travels together with its history entry, so the audit log can
/// never trail the step.
#[derive(Debug, Clone, Default)]
pub struct WithdrawalUpdate {
    /// New step, if the operation transitions the state machine
    pub step: Option<WithdrawalStep>,
    /// New bank transfer status
    pub bank_status: Option<BankTransferStatus>,
    /// Bank-assigned transaction reference
    pub destination_transaction_id: Option<BankTransactionId>,
    /// Diagnostic comment
    pub comment: Option<String>,
    /// Last error observed
    pub last_error: Option<String>,
    /// Terminal outcome reached
    pub processed: Option<bool>,
    /// Transfer instruction handed to the bank
    pub sent_to_destination: Option<bool>,
    /// Compensating credit-back applied
    pub user_credited: Option<bool>,
    /// History entry to append
    pub push_history: Option<StepHistoryEntry>,
    /// Notification record to append
    pub push_notification: Option<NotificationRecord>,
}

impl WithdrawalUpdate {
    /// An update that moves the state machine to `step` at `at`.
    ///
    /// The matching history entry is appended in the same write.
    #[must_use]
    pub fn step_change(step: WithdrawalStep, at: DateTime<Utc>) -> Self {
        Self {
            step: Some(step),
            push_history: Some(StepHistoryEntry::new(step, at)),
            ..Self::default()
        }
    }

    /// An update that only appends a notification record.
    #[must_use]
    pub fn notification(record: NotificationRecord) -> Self {
        Self {
            push_notification: Some(record),
            ..Self::default()
        }
    }

    /// Set the bank status.
    #[must_use]
    pub fn with_bank_status(mut self, status: BankTransferStatus) -> Self {
        self.bank_status = Some(status);
        self
    }

    /// Set the bank-assigned transaction reference.
    #[must_use]
    pub fn with_destination_transaction_id(mut self, id: BankTransactionId) -> Self {
        self.destination_transaction_id = Some(id);
        self
    }

    /// Set the diagnostic comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Set the last error.
    #[must_use]
    pub fn with_last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Mark the withdrawal as processed.
    #[must_use]
    pub const fn mark_processed(mut self) -> Self {
        self.processed = Some(true);
        self
    }

    /// Mark the transfer instruction as handed to the bank.
    #[must_use]
    pub const fn mark_sent_to_destination(mut self) -> Self {
        self.sent_to_destination = Some(true);
        self
    }

    /// Mark the compensating credit-back as applied.
    #[must_use]
    pub const fn mark_user_credited(mut self) -> Self {
        self.user_credited = Some(true);
        self
    }

    /// Validate this update against the record it will be applied to.
    ///
    /// # Errors
    ///
    /// - `PreconditionFailed` when the step change is not a legal transition
    ///   from the record's current step
    /// - `Storage` when the update is internally inconsistent (history entry
    ///   not matching the step it travels with)
    pub fn validate(&self, current: &Withdrawal) -> Result<(), WithdrawalError> {
        if let Some(step) = self.step {
            if !current.step.can_transition_to(step) {
                return Err(WithdrawalError::PreconditionFailed {
                    withdrawal_id: current.id.clone(),
                    actual: current.step,
                    expected: WithdrawalStep::predecessors(step),
                });
            }
            if let Some(entry) = &self.push_history {
                if entry.step != step {
                    return Err(WithdrawalError::Storage(format!(
                        "history entry step {} does not match update step {step}",
                        entry.step
                    )));
                }
            }
        } else if let Some(entry) = &self.push_history {
            // A history append without a step change records a retry of the
            // current step.
            if entry.step != current.step {
                return Err(WithdrawalError::Storage(format!(
                    "retry history entry step {} does not match current step {}",
                    entry.step, current.step
                )));
            }
        }
        Ok(())
    }

    /// Apply the update in place. Call [`Self::validate`] first.
    pub fn apply(self, withdrawal: &mut Withdrawal, now: DateTime<Utc>) {
        if let Some(step) = self.step {
            withdrawal.step = step;
            withdrawal.step_retrial_count = 0;
        }
        if let Some(status) = self.bank_status {
            withdrawal.bank_status = status;
        }
        if let Some(id) = self.destination_transaction_id {
            withdrawal.destination_transaction_id = Some(id);
        }
        if let Some(comment) = self.comment {
            withdrawal.comment = comment;
        }
        if let Some(error) = self.last_error {
            withdrawal.last_error = Some(error);
        }
        if let Some(processed) = self.processed {
            withdrawal.processed = processed;
        }
        if let Some(sent) = self.sent_to_destination {
            withdrawal.sent_to_destination = sent;
        }
        if let Some(credited) = self.user_credited {
            withdrawal.user_credited = credited;
        }
        if let Some(entry) = self.push_history {
            withdrawal.step_retrial_count = entry.retrial_count;
            withdrawal.step_history.push(entry);
        }
        if let Some(record) = self.push_notification {
            withdrawal.notifications.push(record);
        }
        withdrawal.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NotificationKind, WithdrawalSource};

    fn sample() -> Withdrawal {
        Withdrawal::new(
            WithdrawalId::new(),
            UserId::new(),
            PlanAccountId::new(),
            BankAccountId::new(),
            WithdrawalSource::Ops,
            Money::from_cents(2500),
            Utc::now(),
        )
    }

    #[test]
    fn step_change_carries_matching_history_entry() {
        let update = WithdrawalUpdate::step_change(WithdrawalStep::Debiting, Utc::now());
        assert_eq!(update.step, Some(WithdrawalStep::Debiting));
        let entry = update.push_history.as_ref();
        assert!(entry.is_some_and(|e| e.step == WithdrawalStep::Debiting));
    }

    #[test]
    fn validate_rejects_illegal_transition() {
        let withdrawal = sample(); // Created
        let update = WithdrawalUpdate::step_change(WithdrawalStep::Completed, Utc::now());
        let result = update.validate(&withdrawal);
        assert!(matches!(
            result,
            Err(WithdrawalError::PreconditionFailed { .. })
        ));
    }

    #[test]
    fn validate_accepts_legal_transition() {
        let withdrawal = sample();
        let update = WithdrawalUpdate::step_change(WithdrawalStep::Debiting, Utc::now());
        assert!(update.validate(&withdrawal).is_ok());
    }

    #[test]
    fn apply_moves_step_and_appends_history() {
        let mut withdrawal = sample();
        let now = Utc::now();
        let update = WithdrawalUpdate::step_change(WithdrawalStep::Debiting, now)
            .with_last_error("for the record");
        assert!(update.validate(&withdrawal).is_ok());
        update.apply(&mut withdrawal, now);

        assert_eq!(withdrawal.step, WithdrawalStep::Debiting);
        assert_eq!(withdrawal.step_history.len(), 2);
        assert_eq!(withdrawal.last_history_step(), Some(WithdrawalStep::Debiting));
        assert_eq!(withdrawal.last_error.as_deref(), Some("for the record"));
        assert_eq!(withdrawal.updated_at, now);
    }

    #[test]
    fn notification_update_leaves_step_alone() {
        let mut withdrawal = sample();
        let now = Utc::now();
        let record = NotificationRecord {
            kind: NotificationKind::Failure,
            message: "it failed".to_string(),
            sent_at: now,
            user_id: withdrawal.user_id.clone(),
            delivered: true,
        };
        let update = WithdrawalUpdate::notification(record);
        assert!(update.validate(&withdrawal).is_ok());
        update.apply(&mut withdrawal, now);

        assert_eq!(withdrawal.step, WithdrawalStep::Created);
        assert_eq!(withdrawal.step_history.len(), 1);
        assert_eq!(withdrawal.notifications.len(), 1);
    }

    #[test]
    fn retry_history_append_must_match_current_step() {
        let withdrawal = sample(); // Created
        let update = WithdrawalUpdate {
            push_history: Some(StepHistoryEntry {
                step: WithdrawalStep::Debiting,
                retrial_count: 1,
                at: Utc::now(),
            }),
            ..WithdrawalUpdate::default()
        };
        assert!(matches!(
            update.validate(&withdrawal),
            Err(WithdrawalError::Storage(_))
        ));
    }
}

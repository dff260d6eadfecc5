//! Step-guarded withdrawal operations.
//!
//! Every operation here follows the same shape: load the record (with a
//! short backoff absorbing reads that race a just-created withdrawal),
//! assert the step guard, perform the collaborator call, then write the step
//! change and its history entry in one store update. The guard runs before
//! any side effect, so an operation invoked at the wrong step touches
//! nothing.

use crate::config::SagaConfig;
use crate::error::WithdrawalError;
use crate::ports::{AccountLedger, BankGateway, WithdrawalStore, WithdrawalUpdate};
use crate::step::{WithdrawalStep, assert_step};
use crate::types::{
    BankAccountId, BankTransactionId, BankTransferStatus, Money, NotificationRecord,
    PlanAccountId, UserId, Withdrawal, WithdrawalId, WithdrawalSource,
};
use cashout_core::environment::Clock;
use cashout_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use cashout_runtime::metrics::SagaMetrics;
use cashout_runtime::retry::{RetryPolicy, retry_with_predicate};
use std::sync::Arc;

/// Outcome of a debit attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DebitOutcome {
    /// Funds were debited; the withdrawal is ready to go to the bank
    Debited {
        /// Debited amount
        amount: Money,
        /// Destination bank account
        bank_account_id: BankAccountId,
    },
    /// The account lacks available funds; the withdrawal short-circuits
    InsufficientFunds {
        /// Requested amount
        amount: Money,
        /// Diagnostic for the failure notification
        reason: String,
    },
    /// The debit failed for a reason other than funds; no money moved
    Failed {
        /// Diagnostic for the failure notification
        reason: String,
    },
}

/// Outcome of handing the transfer instruction to the bank.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The bank accepted the instruction; awaiting the asynchronous callback
    Sent {
        /// Destination bank account
        bank_account_id: BankAccountId,
        /// Amount in flight
        amount: Money,
    },
    /// The instruction was not accepted; the debit must be compensated
    Rejected {
        /// Gateway-provided reason
        reason: String,
    },
}

/// Outcome of applying the bank's asynchronous response.
#[derive(Debug, Clone, PartialEq)]
pub enum BankResponseOutcome {
    /// The bank confirmed the transfer
    Accepted {
        /// Bank-assigned transaction reference
        bank_transaction_id: Option<BankTransactionId>,
    },
    /// The bank reported the transfer failed; the debit must be compensated
    Rejected {
        /// Bank-provided reason
        reason: String,
    },
}

/// The step-guarded core of the withdrawal saga.
///
/// Owns the collaborator ports and enforces the state machine. The saga
/// reducer calls these operations from its effects and turns the outcomes
/// into the next event.
pub struct WithdrawalService {
    store: Arc<dyn WithdrawalStore>,
    ledger: Arc<dyn AccountLedger>,
    bank: Arc<dyn BankGateway>,
    clock: Arc<dyn Clock>,
    lookup_retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl WithdrawalService {
    /// Wire a service from its collaborators and configuration
    #[must_use]
    pub fn new(
        store: Arc<dyn WithdrawalStore>,
        ledger: Arc<dyn AccountLedger>,
        bank: Arc<dyn BankGateway>,
        clock: Arc<dyn Clock>,
        config: &SagaConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            bank,
            clock,
            lookup_retry: config.lookup_retry.clone(),
            breaker: CircuitBreaker::new(config.breaker.clone()),
        }
    }

    /// Create a withdrawal record in step `Created`.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a zero amount
    /// - `Storage` when the record cannot be persisted
    #[tracing::instrument(skip(self), fields(user = %user_id, account = %account_id))]
    pub async fn create_withdrawal(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        bank_account_id: BankAccountId,
        source: WithdrawalSource,
        amount: Money,
    ) -> Result<Withdrawal, WithdrawalError> {
        if amount.is_zero() {
            return Err(WithdrawalError::InvalidRequest(
                "withdrawal amount must be greater than zero".to_string(),
            ));
        }

        let withdrawal = Withdrawal::new(
            WithdrawalId::new(),
            user_id.clone(),
            account_id.clone(),
            bank_account_id,
            source,
            amount,
            self.clock.now(),
        );

        let created = self.store.create(user_id, account_id, withdrawal).await?;
        SagaMetrics::record_step(WithdrawalStep::Created.as_str());
        tracing::info!(withdrawal = %created.id, amount = %created.amount, "Created withdrawal");
        Ok(created)
    }

    /// Load a withdrawal, absorbing reads that race its creation.
    ///
    /// # Errors
    ///
    /// `WithdrawalNotFound` once the bounded retry is exhausted.
    pub async fn get_by_id(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> Result<Withdrawal, WithdrawalError> {
        retry_with_predicate(
            self.lookup_retry.clone(),
            || {
                let store = Arc::clone(&self.store);
                let user_id = user_id.clone();
                let account_id = account_id.clone();
                let withdrawal_id = withdrawal_id.clone();
                async move {
                    store
                        .get_by_id(user_id, account_id, withdrawal_id.clone())
                        .await?
                        .ok_or(WithdrawalError::WithdrawalNotFound(withdrawal_id))
                }
            },
            WithdrawalError::is_retryable,
        )
        .await
    }

    /// Debit the account for a withdrawal in step `Created`.
    ///
    /// On success the withdrawal moves `Created -> Debiting ->
    /// SendingToBank`. `NotEnoughFunds` short-circuits to
    /// `InsufficientFunds`; any other ledger failure lands directly in
    /// `Failed` (no money moved, nothing to compensate). This operation
    /// fires exactly once per withdrawal: the `Created` guard rejects
    /// replays before the ledger is touched.
    ///
    /// # Errors
    ///
    /// - `PreconditionFailed` when the withdrawal is not in `Created`
    /// - `WithdrawalNotFound` / `Storage` on record access failures
    #[tracing::instrument(skip(self), fields(withdrawal = %withdrawal_id))]
    pub async fn debit_account(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> Result<DebitOutcome, WithdrawalError> {
        let withdrawal = self
            .get_by_id(user_id.clone(), account_id.clone(), withdrawal_id.clone())
            .await?;
        assert_step(&withdrawal, &[WithdrawalStep::Created])?;

        self.transition(&user_id, &account_id, &withdrawal_id, WithdrawalStep::Debiting, None)
            .await?;

        match self
            .ledger
            .check_and_debit(user_id.clone(), account_id.clone(), withdrawal.amount)
            .await
        {
            Ok(_) => {
                self.transition(
                    &user_id,
                    &account_id,
                    &withdrawal_id,
                    WithdrawalStep::SendingToBank,
                    None,
                )
                .await?;
                Ok(DebitOutcome::Debited {
                    amount: withdrawal.amount,
                    bank_account_id: withdrawal.destination_bank_account_id,
                })
            }
            Err(err) if err.is_insufficient_funds() => {
                let reason = err.to_string();
                self.transition(
                    &user_id,
                    &account_id,
                    &withdrawal_id,
                    WithdrawalStep::InsufficientFunds,
                    Some(&reason),
                )
                .await?;
                Ok(DebitOutcome::InsufficientFunds {
                    amount: withdrawal.amount,
                    reason,
                })
            }
            Err(err) => {
                let reason = err.to_string();
                self.transition(
                    &user_id,
                    &account_id,
                    &withdrawal_id,
                    WithdrawalStep::Failed,
                    Some(&reason),
                )
                .await?;
                Ok(DebitOutcome::Failed { reason })
            }
        }
    }

    /// Finalize an `InsufficientFunds` withdrawal to `Failed`.
    ///
    /// Returns the diagnostic reason for the failure notification. The bank
    /// is never contacted on this path.
    ///
    /// # Errors
    ///
    /// - `PreconditionFailed` when the withdrawal is not in
    ///   `InsufficientFunds`
    /// - `WithdrawalNotFound` / `Storage` on record access failures
    #[tracing::instrument(skip(self), fields(withdrawal = %withdrawal_id))]
    pub async fn finalize_insufficient_funds(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> Result<String, WithdrawalError> {
        let withdrawal = self
            .get_by_id(user_id.clone(), account_id.clone(), withdrawal_id.clone())
            .await?;
        assert_step(&withdrawal, &[WithdrawalStep::InsufficientFunds])?;

        let reason = withdrawal
            .last_error
            .unwrap_or_else(|| "not enough funds available for withdrawal".to_string());

        self.transition(
            &user_id,
            &account_id,
            &withdrawal_id,
            WithdrawalStep::Failed,
            Some(&reason),
        )
        .await?;
        Ok(reason)
    }

    /// Hand the transfer instruction to the bank for a withdrawal in
    /// `SendingToBank`.
    ///
    /// A successful handoff leaves the step untouched - the saga now waits
    /// for the bank's asynchronous callback. A rejected handoff (including a
    /// breaker-open fast failure) moves the withdrawal to `RollingBack`;
    /// the debit has already committed and must be compensated.
    ///
    /// # Errors
    ///
    /// - `PreconditionFailed` when the withdrawal is not in `SendingToBank`
    /// - `WithdrawalNotFound` / `Storage` on record access failures
    #[tracing::instrument(skip(self), fields(withdrawal = %withdrawal_id))]
    pub async fn send_bank_transfer(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> Result<SendOutcome, WithdrawalError> {
        let withdrawal = self
            .get_by_id(user_id.clone(), account_id.clone(), withdrawal_id.clone())
            .await?;
        assert_step(&withdrawal, &[WithdrawalStep::SendingToBank])?;

        let result = self
            .breaker
            .call(|| {
                self.bank.initiate_transfer(
                    user_id.clone(),
                    withdrawal.destination_bank_account_id.clone(),
                    withdrawal_id.clone(),
                    withdrawal.amount,
                )
            })
            .await;

        match result {
            Ok(()) => {
                self.store
                    .update(
                        user_id,
                        account_id,
                        withdrawal_id,
                        WithdrawalUpdate::default().mark_sent_to_destination(),
                    )
                    .await?;
                Ok(SendOutcome::Sent {
                    bank_account_id: withdrawal.destination_bank_account_id,
                    amount: withdrawal.amount,
                })
            }
            Err(err) => {
                let reason = match err {
                    CircuitBreakerError::Open => {
                        "bank gateway unavailable (circuit open)".to_string()
                    }
                    CircuitBreakerError::Inner(inner) => inner.to_string(),
                };
                self.transition(
                    &user_id,
                    &account_id,
                    &withdrawal_id,
                    WithdrawalStep::RollingBack,
                    Some(&reason),
                )
                .await?;
                Ok(SendOutcome::Rejected { reason })
            }
        }
    }

    /// Apply the bank's asynchronous response to a withdrawal in
    /// `SendingToBank`.
    ///
    /// Records the `ReceivedBankResponse` step and the bank status. A
    /// failure response additionally moves the withdrawal to `RollingBack`.
    /// Replayed callbacks for withdrawals already past `SendingToBank` are
    /// rejected by the guard with no side effect.
    ///
    /// # Errors
    ///
    /// - `PreconditionFailed` when the withdrawal is not in `SendingToBank`
    ///   (duplicate or late callback)
    /// - `WithdrawalNotFound` / `Storage` on record access failures
    #[tracing::instrument(skip(self, bank_transaction_id), fields(withdrawal = %withdrawal_id))]
    pub async fn receive_bank_response(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
        success: bool,
        bank_transaction_id: Option<BankTransactionId>,
        error_reason: Option<String>,
    ) -> Result<BankResponseOutcome, WithdrawalError> {
        let withdrawal = self
            .get_by_id(user_id.clone(), account_id.clone(), withdrawal_id.clone())
            .await?;
        assert_step(&withdrawal, &[WithdrawalStep::SendingToBank])?;

        let status = if success {
            BankTransferStatus::Accepted
        } else {
            BankTransferStatus::Rejected
        };
        let comment = error_reason.clone().unwrap_or_default();

        self.store
            .update(
                user_id.clone(),
                account_id.clone(),
                withdrawal_id.clone(),
                WithdrawalUpdate::step_change(
                    WithdrawalStep::ReceivedBankResponse,
                    self.clock.now(),
                )
                .with_bank_status(status)
                .with_comment(comment),
            )
            .await?;
        SagaMetrics::record_step(WithdrawalStep::ReceivedBankResponse.as_str());

        if success {
            Ok(BankResponseOutcome::Accepted {
                bank_transaction_id,
            })
        } else {
            let reason = error_reason
                .unwrap_or_else(|| "bank reported the transfer failed".to_string());
            self.transition(
                &user_id,
                &account_id,
                &withdrawal_id,
                WithdrawalStep::RollingBack,
                Some(&reason),
            )
            .await?;
            Ok(BankResponseOutcome::Rejected { reason })
        }
    }

    /// Complete a withdrawal whose bank response was accepted.
    ///
    /// # Errors
    ///
    /// - `PreconditionFailed` when the withdrawal is not in
    ///   `ReceivedBankResponse`
    /// - `WithdrawalNotFound` / `Storage` on record access failures
    #[tracing::instrument(skip(self, bank_transaction_id), fields(withdrawal = %withdrawal_id))]
    pub async fn complete_withdrawal(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
        bank_transaction_id: Option<BankTransactionId>,
    ) -> Result<Withdrawal, WithdrawalError> {
        let withdrawal = self
            .get_by_id(user_id.clone(), account_id.clone(), withdrawal_id.clone())
            .await?;
        assert_step(&withdrawal, &[WithdrawalStep::ReceivedBankResponse])?;

        let mut update = WithdrawalUpdate::step_change(WithdrawalStep::Completed, self.clock.now())
            .mark_processed()
            .mark_sent_to_destination();
        if let Some(id) = bank_transaction_id {
            update = update.with_destination_transaction_id(id);
        }

        let completed = self
            .store
            .update(user_id, account_id, withdrawal_id, update)
            .await?;
        SagaMetrics::record_step(WithdrawalStep::Completed.as_str());
        tracing::info!(withdrawal = %completed.id, "Withdrawal completed");
        Ok(completed)
    }

    /// Compensate the debit of a withdrawal in `RollingBack`.
    ///
    /// Credits the full amount back to both balance fields, then finalizes
    /// the withdrawal to `Failed`. This is the only place money returns to
    /// the user, and the `RollingBack` guard makes it reachable at most
    /// once. The credit-back itself is best-effort: a ledger failure is
    /// recorded on the withdrawal and the saga still ends in `Failed`.
    ///
    /// # Errors
    ///
    /// - `PreconditionFailed` when the withdrawal is not in `RollingBack`
    /// - `WithdrawalNotFound` / `Storage` on record access failures
    #[tracing::instrument(skip(self), fields(withdrawal = %withdrawal_id))]
    pub async fn rollback_debit(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> Result<Withdrawal, WithdrawalError> {
        let withdrawal = self
            .get_by_id(user_id.clone(), account_id.clone(), withdrawal_id.clone())
            .await?;
        assert_step(&withdrawal, &[WithdrawalStep::RollingBack])?;

        let mut update = WithdrawalUpdate::step_change(WithdrawalStep::Failed, self.clock.now());
        match self
            .ledger
            .credit_back(user_id.clone(), account_id.clone(), withdrawal.amount)
            .await
        {
            Ok(_) => {
                SagaMetrics::record_compensation();
                update = update.mark_user_credited();
            }
            Err(err) => {
                // Best-effort: the withdrawal still ends Failed, with the
                // credit failure on the record for operations to chase.
                tracing::error!(
                    withdrawal = %withdrawal_id,
                    error = %err,
                    "Credit-back failed during rollback"
                );
                update = update.with_last_error(format!("credit-back failed: {err}"));
            }
        }

        let failed = self
            .store
            .update(user_id, account_id, withdrawal_id, update)
            .await?;
        SagaMetrics::record_step(WithdrawalStep::Failed.as_str());
        Ok(failed)
    }

    /// Give up on a withdrawal stuck in `SendingToBank`.
    ///
    /// Invoked by the saga's bank-response timeout. Returns `Some(reason)`
    /// when the withdrawal was actually stuck and is now `RollingBack`;
    /// `None` when the callback won the race and there is nothing to do.
    ///
    /// # Errors
    ///
    /// `WithdrawalNotFound` / `Storage` on record access failures.
    #[tracing::instrument(skip(self), fields(withdrawal = %withdrawal_id))]
    pub async fn time_out_bank_response(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> Result<Option<String>, WithdrawalError> {
        let withdrawal = self
            .get_by_id(user_id.clone(), account_id.clone(), withdrawal_id.clone())
            .await?;
        if withdrawal.step != WithdrawalStep::SendingToBank {
            tracing::debug!(
                withdrawal = %withdrawal_id,
                step = %withdrawal.step,
                "Bank response timer fired after the saga moved on"
            );
            return Ok(None);
        }

        let reason = "bank response timed out".to_string();
        match self
            .transition(
                &user_id,
                &account_id,
                &withdrawal_id,
                WithdrawalStep::RollingBack,
                Some(&reason),
            )
            .await
        {
            Ok(()) => {
                SagaMetrics::record_timeout();
                Ok(Some(reason))
            }
            // The callback can still win the race between our read and this
            // write; the guard in the store turns that into a no-op.
            Err(WithdrawalError::PreconditionFailed { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Append a notification attempt to the withdrawal's audit trail.
    ///
    /// # Errors
    ///
    /// `WithdrawalNotFound` / `Storage` on record access failures.
    pub async fn record_notification(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
        record: NotificationRecord,
    ) -> Result<(), WithdrawalError> {
        self.store
            .update(
                user_id,
                account_id,
                withdrawal_id,
                WithdrawalUpdate::notification(record),
            )
            .await?;
        Ok(())
    }

    /// Current time from the injected clock
    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Write a step change plus its history entry in one update.
    async fn transition(
        &self,
        user_id: &UserId,
        account_id: &PlanAccountId,
        withdrawal_id: &WithdrawalId,
        step: WithdrawalStep,
        error: Option<&str>,
    ) -> Result<(), WithdrawalError> {
        let mut update = WithdrawalUpdate::step_change(step, self.clock.now());
        if let Some(error) = error {
            update = update.with_last_error(error).with_comment(error);
        }
        self.store
            .update(
                user_id.clone(),
                account_id.clone(),
                withdrawal_id.clone(),
                update,
            )
            .await?;
        SagaMetrics::record_step(step.as_str());
        tracing::debug!(withdrawal = %withdrawal_id, step = %step, "Step transition");
        Ok(())
    }
}

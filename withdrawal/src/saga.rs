//! The withdrawal saga orchestrator.
//!
//! One reducer over one tagged union of commands and events. Each event
//! handler issues at most one next command; each command handler runs a
//! step-guarded service operation inside an effect and turns the outcome
//! into the next event. The dispatch table is the `match` below - statically
//! typed, compile-time wired, no runtime handler registry.
//!
//! ```text
//! RequestWithdrawal ──► WithdrawalCreated ──► DebitAccount
//!                                                │
//!                  ┌─────────────────────────────┼──────────────────┐
//!                  ▼                             ▼                  ▼
//!     WithdrawalInsufficientFunds        WithdrawalDebited   WithdrawalFailed
//!                  │                             │
//!                  ▼                             ▼
//!          WithdrawalFailed                 SendToBank ──► WithdrawalSentToBank
//!                                                │              │ (suspend +
//!                                                ▼              ▼  timeout)
//!                                      WithdrawalRollingBack  BankResponseReceived
//!                                                │              │
//!                                                ▼              ├─ success ─► CompleteWithdrawal
//!                                          RollbackDebit        └─ failure ─► WithdrawalRollingBack
//!                                                │
//!                                                ▼
//!                                         WithdrawalFailed ──► NotifyUser
//! ```
//!
//! Error isolation: no handler lets an orchestration error escape the
//! effect. Failures are logged and counted, and the saga is left stalled at
//! its current step - redelivery or the bank-response timeout moves it on -
//! never poisoned.

use crate::config::SagaConfig;
use crate::notify::UserNotifier;
use crate::service::{BankResponseOutcome, DebitOutcome, SendOutcome, WithdrawalService};
use crate::step::WithdrawalStep;
use crate::types::{
    BankAccountId, BankTransactionId, Money, NotificationKind, PlanAccountId, UserId,
    WithdrawalId, WithdrawalSource,
};
use cashout_core::environment::Clock;
use cashout_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use cashout_macros::Action;
use cashout_runtime::metrics::SagaMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Commands and events of the withdrawal saga.
///
/// Commands ask for work; events record facts. The bank's asynchronous
/// answer enters the system as an externally injected
/// [`WithdrawalAction::BankResponseReceived`] event (the webhook boundary).
#[derive(Action, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WithdrawalAction {
    // ========== Commands ==========
    /// Command: start a withdrawal
    #[command]
    RequestWithdrawal {
        /// Requesting user
        user_id: UserId,
        /// Account to debit
        account_id: PlanAccountId,
        /// Destination bank account
        bank_account_id: BankAccountId,
        /// Channel the request arrived from
        source: WithdrawalSource,
        /// Amount in cents
        amount: Money,
    },

    /// Command: debit the account
    #[command]
    DebitAccount {
        /// Requesting user
        user_id: UserId,
        /// Account to debit
        account_id: PlanAccountId,
        /// Withdrawal being processed
        withdrawal_id: WithdrawalId,
    },

    /// Command: hand the transfer instruction to the bank
    #[command]
    SendToBank {
        /// Requesting user
        user_id: UserId,
        /// Account the money left
        account_id: PlanAccountId,
        /// Withdrawal being processed
        withdrawal_id: WithdrawalId,
    },

    /// Command: finalize a withdrawal the bank confirmed
    #[command]
    CompleteWithdrawal {
        /// Requesting user
        user_id: UserId,
        /// Account the money left
        account_id: PlanAccountId,
        /// Withdrawal being processed
        withdrawal_id: WithdrawalId,
        /// Bank-assigned transaction reference
        bank_transaction_id: Option<BankTransactionId>,
    },

    /// Command: compensate a committed debit
    #[command]
    RollbackDebit {
        /// Requesting user
        user_id: UserId,
        /// Account to credit back
        account_id: PlanAccountId,
        /// Withdrawal being processed
        withdrawal_id: WithdrawalId,
        /// Why the withdrawal is being rolled back
        reason: String,
    },

    /// Command: notify the user of a terminal outcome
    #[command]
    NotifyUser {
        /// User to notify
        user_id: UserId,
        /// Account the withdrawal belonged to
        account_id: PlanAccountId,
        /// Withdrawal the notification concerns
        withdrawal_id: WithdrawalId,
        /// Success or failure
        kind: NotificationKind,
        /// Failure reason, for failure notifications
        reason: Option<String>,
    },

    /// Command: give up waiting for the bank callback
    ///
    /// Scheduled by the saga itself when a withdrawal goes to the bank; a
    /// no-op if the callback arrived first.
    #[command]
    TimeOutBankResponse {
        /// Requesting user
        user_id: UserId,
        /// Account the money left
        account_id: PlanAccountId,
        /// Withdrawal being watched
        withdrawal_id: WithdrawalId,
    },

    // ========== Events ==========
    /// Event: withdrawal record created
    #[event]
    WithdrawalCreated {
        /// Requesting user
        user_id: UserId,
        /// Account to debit
        account_id: PlanAccountId,
        /// New withdrawal
        withdrawal_id: WithdrawalId,
        /// Destination bank account
        bank_account_id: BankAccountId,
        /// Amount in cents
        amount: Money,
        /// When the record was created
        created_at: DateTime<Utc>,
    },

    /// Event: funds debited from the account
    #[event]
    WithdrawalDebited {
        /// Requesting user
        user_id: UserId,
        /// Debited account
        account_id: PlanAccountId,
        /// Withdrawal being processed
        withdrawal_id: WithdrawalId,
        /// Debited amount
        amount: Money,
        /// Destination bank account
        bank_account_id: BankAccountId,
        /// When the debit committed
        debited_at: DateTime<Utc>,
    },

    /// Event: the account lacks available funds
    #[event]
    WithdrawalInsufficientFunds {
        /// Requesting user
        user_id: UserId,
        /// Checked account
        account_id: PlanAccountId,
        /// Withdrawal being processed
        withdrawal_id: WithdrawalId,
        /// Requested amount
        amount: Money,
        /// Diagnostic for the failure notification
        reason: String,
        /// When the check failed
        at: DateTime<Utc>,
    },

    /// Event: transfer instruction handed to the bank
    ///
    /// The saga now suspends on the out-of-band bank callback.
    #[event]
    WithdrawalSentToBank {
        /// Requesting user
        user_id: UserId,
        /// Account the money left
        account_id: PlanAccountId,
        /// Withdrawal being processed
        withdrawal_id: WithdrawalId,
        /// Destination bank account
        bank_account_id: BankAccountId,
        /// Amount in flight
        amount: Money,
        /// When the instruction was accepted
        sent_at: DateTime<Utc>,
    },

    /// Event: the bank's asynchronous answer arrived
    #[event]
    BankResponseReceived {
        /// Requesting user
        user_id: UserId,
        /// Account the money left
        account_id: PlanAccountId,
        /// Withdrawal the answer concerns
        withdrawal_id: WithdrawalId,
        /// Whether the transfer went through
        success: bool,
        /// Bank-assigned transaction reference, on success
        bank_transaction_id: Option<BankTransactionId>,
        /// Bank-provided reason, on failure
        error_reason: Option<String>,
        /// When the answer arrived
        received_at: DateTime<Utc>,
    },

    /// Event: a committed debit needs compensation
    #[event]
    WithdrawalRollingBack {
        /// Requesting user
        user_id: UserId,
        /// Account to credit back
        account_id: PlanAccountId,
        /// Withdrawal being rolled back
        withdrawal_id: WithdrawalId,
        /// Why compensation is needed
        reason: String,
        /// When the rollback was decided
        at: DateTime<Utc>,
    },

    /// Event: terminal success
    #[event]
    WithdrawalCompleted {
        /// Requesting user
        user_id: UserId,
        /// Account the money left
        account_id: PlanAccountId,
        /// Completed withdrawal
        withdrawal_id: WithdrawalId,
        /// Bank-assigned transaction reference
        bank_transaction_id: Option<BankTransactionId>,
        /// When the withdrawal completed
        completed_at: DateTime<Utc>,
    },

    /// Event: terminal failure
    #[event]
    WithdrawalFailed {
        /// Requesting user
        user_id: UserId,
        /// Account the withdrawal belonged to
        account_id: PlanAccountId,
        /// Failed withdrawal
        withdrawal_id: WithdrawalId,
        /// Why the withdrawal failed
        reason: String,
        /// When the withdrawal failed
        failed_at: DateTime<Utc>,
    },
}

/// Observability mirror of one in-flight (or retained terminal) saga.
///
/// The authoritative step guard lives on the store-backed record; this
/// mirror exists so operators can read saga progress off the store state
/// without a record lookup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SagaProgress {
    /// Requesting user
    pub user_id: UserId,
    /// Account under withdrawal
    pub account_id: PlanAccountId,
    /// Step as last observed by the orchestrator
    pub step: WithdrawalStep,
    /// When the orchestrator last observed a transition
    pub updated_at: DateTime<Utc>,
}

/// Saga coordinator state: progress mirror plus last validation error.
#[derive(Clone, Debug, Default)]
pub struct WithdrawalSagaState {
    /// Progress per withdrawal, terminal entries retained for audit
    pub sagas: HashMap<WithdrawalId, SagaProgress>,
    /// Last validation or orchestration error observed
    pub last_error: Option<String>,
}

impl WithdrawalSagaState {
    /// Creates an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress for one withdrawal
    #[must_use]
    pub fn progress(&self, id: &WithdrawalId) -> Option<&SagaProgress> {
        self.sagas.get(id)
    }

    /// Number of tracked sagas
    #[must_use]
    pub fn count(&self) -> usize {
        self.sagas.len()
    }

    fn observe(
        &mut self,
        withdrawal_id: &WithdrawalId,
        user_id: &UserId,
        account_id: &PlanAccountId,
        step: WithdrawalStep,
        at: DateTime<Utc>,
    ) {
        // Terminal entries are retained as-is; a replayed event must not
        // make a finished saga look in-flight again.
        if self
            .sagas
            .get(withdrawal_id)
            .is_some_and(|progress| progress.step.is_terminal())
        {
            return;
        }
        self.sagas.insert(
            withdrawal_id.clone(),
            SagaProgress {
                user_id: user_id.clone(),
                account_id: account_id.clone(),
                step,
                updated_at: at,
            },
        );
    }
}

/// Dependencies injected into the saga reducer.
#[derive(Clone)]
pub struct WithdrawalEnvironment {
    /// Step-guarded withdrawal operations
    pub service: Arc<WithdrawalService>,
    /// Terminal-state user notification
    pub notifier: Arc<UserNotifier>,
    /// Clock for event timestamps
    pub clock: Arc<dyn Clock>,
    /// Saga tunables
    pub config: SagaConfig,
}

impl WithdrawalEnvironment {
    /// Wire an environment
    #[must_use]
    pub fn new(
        service: Arc<WithdrawalService>,
        notifier: Arc<UserNotifier>,
        clock: Arc<dyn Clock>,
        config: SagaConfig,
    ) -> Self {
        Self {
            service,
            notifier,
            clock,
            config,
        }
    }
}

/// The withdrawal saga reducer.
#[derive(Clone, Debug, Default)]
pub struct WithdrawalSaga;

impl WithdrawalSaga {
    /// Creates the saga reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

type Effects = SmallVec<[Effect<WithdrawalAction>; 4]>;

/// Log an effect failure and leave the saga stalled at its current step.
fn stalled(operation: &'static str, err: &crate::error::WithdrawalError) {
    SagaMetrics::record_stalled(operation);
    tracing::error!(operation, error = %err, "Saga handler failed; withdrawal left stalled");
}

impl Reducer for WithdrawalSaga {
    type State = WithdrawalSagaState;
    type Action = WithdrawalAction;
    type Environment = WithdrawalEnvironment;

    #[allow(clippy::too_many_lines)] // The dispatch table is one match by design
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects {
        match action {
            // ========== Commands ==========
            WithdrawalAction::RequestWithdrawal {
                user_id,
                account_id,
                bank_account_id,
                source,
                amount,
            } => {
                if amount.is_zero() {
                    state.last_error =
                        Some("withdrawal amount must be greater than zero".to_string());
                    return SmallVec::new();
                }

                let service = Arc::clone(&env.service);
                smallvec![Effect::future(async move {
                    match service
                        .create_withdrawal(
                            user_id.clone(),
                            account_id.clone(),
                            bank_account_id,
                            source,
                            amount,
                        )
                        .await
                    {
                        Ok(withdrawal) => Some(WithdrawalAction::WithdrawalCreated {
                            user_id,
                            account_id,
                            withdrawal_id: withdrawal.id,
                            bank_account_id: withdrawal.destination_bank_account_id,
                            amount: withdrawal.amount,
                            created_at: withdrawal.created_at,
                        }),
                        Err(err) => {
                            stalled("create_withdrawal", &err);
                            None
                        }
                    }
                })]
            }

            WithdrawalAction::DebitAccount {
                user_id,
                account_id,
                withdrawal_id,
            } => {
                let service = Arc::clone(&env.service);
                let clock = Arc::clone(&env.clock);
                smallvec![Effect::future(async move {
                    let outcome = service
                        .debit_account(
                            user_id.clone(),
                            account_id.clone(),
                            withdrawal_id.clone(),
                        )
                        .await;
                    let now = clock.now();
                    match outcome {
                        Ok(DebitOutcome::Debited {
                            amount,
                            bank_account_id,
                        }) => Some(WithdrawalAction::WithdrawalDebited {
                            user_id,
                            account_id,
                            withdrawal_id,
                            amount,
                            bank_account_id,
                            debited_at: now,
                        }),
                        Ok(DebitOutcome::InsufficientFunds { amount, reason }) => {
                            Some(WithdrawalAction::WithdrawalInsufficientFunds {
                                user_id,
                                account_id,
                                withdrawal_id,
                                amount,
                                reason,
                                at: now,
                            })
                        }
                        Ok(DebitOutcome::Failed { reason }) => {
                            Some(WithdrawalAction::WithdrawalFailed {
                                user_id,
                                account_id,
                                withdrawal_id,
                                reason,
                                failed_at: now,
                            })
                        }
                        Err(err) => {
                            stalled("debit_account", &err);
                            None
                        }
                    }
                })]
            }

            WithdrawalAction::SendToBank {
                user_id,
                account_id,
                withdrawal_id,
            } => {
                let service = Arc::clone(&env.service);
                let clock = Arc::clone(&env.clock);
                smallvec![Effect::future(async move {
                    let outcome = service
                        .send_bank_transfer(
                            user_id.clone(),
                            account_id.clone(),
                            withdrawal_id.clone(),
                        )
                        .await;
                    let now = clock.now();
                    match outcome {
                        Ok(SendOutcome::Sent {
                            bank_account_id,
                            amount,
                        }) => Some(WithdrawalAction::WithdrawalSentToBank {
                            user_id,
                            account_id,
                            withdrawal_id,
                            bank_account_id,
                            amount,
                            sent_at: now,
                        }),
                        Ok(SendOutcome::Rejected { reason }) => {
                            Some(WithdrawalAction::WithdrawalRollingBack {
                                user_id,
                                account_id,
                                withdrawal_id,
                                reason,
                                at: now,
                            })
                        }
                        Err(err) => {
                            stalled("send_bank_transfer", &err);
                            None
                        }
                    }
                })]
            }

            WithdrawalAction::CompleteWithdrawal {
                user_id,
                account_id,
                withdrawal_id,
                bank_transaction_id,
            } => {
                let service = Arc::clone(&env.service);
                smallvec![Effect::future(async move {
                    match service
                        .complete_withdrawal(
                            user_id.clone(),
                            account_id.clone(),
                            withdrawal_id.clone(),
                            bank_transaction_id.clone(),
                        )
                        .await
                    {
                        Ok(completed) => Some(WithdrawalAction::WithdrawalCompleted {
                            user_id,
                            account_id,
                            withdrawal_id,
                            bank_transaction_id: completed.destination_transaction_id,
                            completed_at: completed.updated_at,
                        }),
                        Err(err) => {
                            stalled("complete_withdrawal", &err);
                            None
                        }
                    }
                })]
            }

            WithdrawalAction::RollbackDebit {
                user_id,
                account_id,
                withdrawal_id,
                reason,
            } => {
                let service = Arc::clone(&env.service);
                smallvec![Effect::future(async move {
                    match service
                        .rollback_debit(
                            user_id.clone(),
                            account_id.clone(),
                            withdrawal_id.clone(),
                        )
                        .await
                    {
                        Ok(failed) => Some(WithdrawalAction::WithdrawalFailed {
                            user_id,
                            account_id,
                            withdrawal_id,
                            reason,
                            failed_at: failed.updated_at,
                        }),
                        Err(err) => {
                            stalled("rollback_debit", &err);
                            None
                        }
                    }
                })]
            }

            WithdrawalAction::NotifyUser {
                user_id,
                account_id,
                withdrawal_id,
                kind,
                reason,
            } => {
                let notifier = Arc::clone(&env.notifier);
                smallvec![Effect::future(async move {
                    match kind {
                        NotificationKind::Success => {
                            notifier
                                .notify_success(user_id, account_id, withdrawal_id)
                                .await;
                        }
                        NotificationKind::Failure => {
                            let reason =
                                reason.unwrap_or_else(|| "withdrawal failed".to_string());
                            notifier
                                .notify_failure(user_id, account_id, withdrawal_id, reason)
                                .await;
                        }
                    }
                    None
                })]
            }

            WithdrawalAction::TimeOutBankResponse {
                user_id,
                account_id,
                withdrawal_id,
            } => {
                let service = Arc::clone(&env.service);
                let clock = Arc::clone(&env.clock);
                smallvec![Effect::future(async move {
                    match service
                        .time_out_bank_response(
                            user_id.clone(),
                            account_id.clone(),
                            withdrawal_id.clone(),
                        )
                        .await
                    {
                        Ok(Some(reason)) => Some(WithdrawalAction::WithdrawalRollingBack {
                            user_id,
                            account_id,
                            withdrawal_id,
                            reason,
                            at: clock.now(),
                        }),
                        Ok(None) => None,
                        Err(err) => {
                            stalled("time_out_bank_response", &err);
                            None
                        }
                    }
                })]
            }

            // ========== Events ==========
            WithdrawalAction::WithdrawalCreated {
                user_id,
                account_id,
                withdrawal_id,
                created_at,
                ..
            } => {
                state.observe(
                    &withdrawal_id,
                    &user_id,
                    &account_id,
                    WithdrawalStep::Created,
                    created_at,
                );
                smallvec![Effect::future(async move {
                    Some(WithdrawalAction::DebitAccount {
                        user_id,
                        account_id,
                        withdrawal_id,
                    })
                })]
            }

            WithdrawalAction::WithdrawalDebited {
                user_id,
                account_id,
                withdrawal_id,
                debited_at,
                ..
            } => {
                state.observe(
                    &withdrawal_id,
                    &user_id,
                    &account_id,
                    WithdrawalStep::SendingToBank,
                    debited_at,
                );
                smallvec![Effect::future(async move {
                    Some(WithdrawalAction::SendToBank {
                        user_id,
                        account_id,
                        withdrawal_id,
                    })
                })]
            }

            WithdrawalAction::WithdrawalInsufficientFunds {
                user_id,
                account_id,
                withdrawal_id,
                at,
                ..
            } => {
                state.observe(
                    &withdrawal_id,
                    &user_id,
                    &account_id,
                    WithdrawalStep::InsufficientFunds,
                    at,
                );
                let service = Arc::clone(&env.service);
                let clock = Arc::clone(&env.clock);
                smallvec![Effect::future(async move {
                    match service
                        .finalize_insufficient_funds(
                            user_id.clone(),
                            account_id.clone(),
                            withdrawal_id.clone(),
                        )
                        .await
                    {
                        Ok(reason) => Some(WithdrawalAction::WithdrawalFailed {
                            user_id,
                            account_id,
                            withdrawal_id,
                            reason,
                            failed_at: clock.now(),
                        }),
                        Err(err) => {
                            stalled("finalize_insufficient_funds", &err);
                            None
                        }
                    }
                })]
            }

            WithdrawalAction::WithdrawalSentToBank {
                user_id,
                account_id,
                withdrawal_id,
                sent_at,
                ..
            } => {
                state.observe(
                    &withdrawal_id,
                    &user_id,
                    &account_id,
                    WithdrawalStep::SendingToBank,
                    sent_at,
                );
                // The saga suspends here; the bank answers out-of-band. The
                // delayed command is the bound on that wait.
                smallvec![Effect::Delay {
                    duration: env.config.bank_response_timeout,
                    action: Box::new(WithdrawalAction::TimeOutBankResponse {
                        user_id,
                        account_id,
                        withdrawal_id,
                    }),
                }]
            }

            WithdrawalAction::BankResponseReceived {
                user_id,
                account_id,
                withdrawal_id,
                success,
                bank_transaction_id,
                error_reason,
                received_at,
            } => {
                state.observe(
                    &withdrawal_id,
                    &user_id,
                    &account_id,
                    WithdrawalStep::ReceivedBankResponse,
                    received_at,
                );
                let service = Arc::clone(&env.service);
                let clock = Arc::clone(&env.clock);
                smallvec![Effect::future(async move {
                    let outcome = service
                        .receive_bank_response(
                            user_id.clone(),
                            account_id.clone(),
                            withdrawal_id.clone(),
                            success,
                            bank_transaction_id,
                            error_reason,
                        )
                        .await;
                    match outcome {
                        Ok(BankResponseOutcome::Accepted {
                            bank_transaction_id,
                        }) => Some(WithdrawalAction::CompleteWithdrawal {
                            user_id,
                            account_id,
                            withdrawal_id,
                            bank_transaction_id,
                        }),
                        Ok(BankResponseOutcome::Rejected { reason }) => {
                            Some(WithdrawalAction::WithdrawalRollingBack {
                                user_id,
                                account_id,
                                withdrawal_id,
                                reason,
                                at: clock.now(),
                            })
                        }
                        Err(err) => {
                            // Duplicate or late callback: the step guard
                            // rejected it, nothing changed.
                            tracing::warn!(
                                withdrawal = %withdrawal_id,
                                error = %err,
                                "Bank response not applicable; ignoring"
                            );
                            None
                        }
                    }
                })]
            }

            WithdrawalAction::WithdrawalRollingBack {
                user_id,
                account_id,
                withdrawal_id,
                reason,
                at,
            } => {
                state.observe(
                    &withdrawal_id,
                    &user_id,
                    &account_id,
                    WithdrawalStep::RollingBack,
                    at,
                );
                smallvec![Effect::future(async move {
                    Some(WithdrawalAction::RollbackDebit {
                        user_id,
                        account_id,
                        withdrawal_id,
                        reason,
                    })
                })]
            }

            WithdrawalAction::WithdrawalCompleted {
                user_id,
                account_id,
                withdrawal_id,
                completed_at,
                ..
            } => {
                state.observe(
                    &withdrawal_id,
                    &user_id,
                    &account_id,
                    WithdrawalStep::Completed,
                    completed_at,
                );
                smallvec![Effect::future(async move {
                    Some(WithdrawalAction::NotifyUser {
                        user_id,
                        account_id,
                        withdrawal_id,
                        kind: NotificationKind::Success,
                        reason: None,
                    })
                })]
            }

            WithdrawalAction::WithdrawalFailed {
                user_id,
                account_id,
                withdrawal_id,
                reason,
                failed_at,
            } => {
                state.observe(
                    &withdrawal_id,
                    &user_id,
                    &account_id,
                    WithdrawalStep::Failed,
                    failed_at,
                );
                state.last_error = Some(reason.clone());
                smallvec![Effect::future(async move {
                    Some(WithdrawalAction::NotifyUser {
                        user_id,
                        account_id,
                        withdrawal_id,
                        kind: NotificationKind::Failure,
                        reason: Some(reason),
                    })
                })]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        InMemoryLedger, InMemoryWithdrawalStore, RecordingNotificationSink, ScriptedBankGateway,
    };
    use cashout_testing::{ReducerTest, assertions, test_clock};

    fn test_environment() -> WithdrawalEnvironment {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let config = SagaConfig::default();
        let service = Arc::new(WithdrawalService::new(
            Arc::new(InMemoryWithdrawalStore::new(Arc::clone(&clock))),
            Arc::new(InMemoryLedger::new(Arc::clone(&clock))),
            Arc::new(ScriptedBankGateway::accepting()),
            Arc::clone(&clock),
            &config,
        ));
        let notifier = Arc::new(UserNotifier::new(
            Arc::new(RecordingNotificationSink::new()),
            Arc::clone(&service),
            Arc::clone(&clock),
        ));
        WithdrawalEnvironment::new(service, notifier, clock, config)
    }

    #[test]
    fn request_with_zero_amount_is_rejected_in_place() {
        ReducerTest::new(WithdrawalSaga::new())
            .with_env(test_environment())
            .given_state(WithdrawalSagaState::new())
            .when_action(WithdrawalAction::RequestWithdrawal {
                user_id: UserId::new(),
                account_id: PlanAccountId::new(),
                bank_account_id: BankAccountId::new(),
                source: WithdrawalSource::System,
                amount: Money::from_cents(0),
            })
            .then_state(|state| {
                assert!(state.last_error.is_some());
                assert_eq!(state.count(), 0);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn created_event_dispatches_debit() {
        let withdrawal_id = WithdrawalId::new();
        let expected = withdrawal_id.clone();
        ReducerTest::new(WithdrawalSaga::new())
            .with_env(test_environment())
            .given_state(WithdrawalSagaState::new())
            .when_action(WithdrawalAction::WithdrawalCreated {
                user_id: UserId::new(),
                account_id: PlanAccountId::new(),
                withdrawal_id,
                bank_account_id: BankAccountId::new(),
                amount: Money::from_cents(5000),
                created_at: test_clock().now(),
            })
            .then_state(move |state| {
                let progress = state.progress(&expected);
                assert!(
                    progress.is_some_and(|p| p.step == WithdrawalStep::Created),
                    "mirror should track the new saga"
                );
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn sent_to_bank_schedules_the_timeout_and_nothing_else() {
        ReducerTest::new(WithdrawalSaga::new())
            .with_env(test_environment())
            .given_state(WithdrawalSagaState::new())
            .when_action(WithdrawalAction::WithdrawalSentToBank {
                user_id: UserId::new(),
                account_id: PlanAccountId::new(),
                withdrawal_id: WithdrawalId::new(),
                bank_account_id: BankAccountId::new(),
                amount: Money::from_cents(5000),
                sent_at: test_clock().now(),
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_delay_effect(effects);
            })
            .run();
    }

    #[test]
    fn failed_event_records_error_and_notifies() {
        let withdrawal_id = WithdrawalId::new();
        let expected = withdrawal_id.clone();
        ReducerTest::new(WithdrawalSaga::new())
            .with_env(test_environment())
            .given_state(WithdrawalSagaState::new())
            .when_action(WithdrawalAction::WithdrawalFailed {
                user_id: UserId::new(),
                account_id: PlanAccountId::new(),
                withdrawal_id,
                reason: "bank said no".to_string(),
                failed_at: test_clock().now(),
            })
            .then_state(move |state| {
                assert_eq!(state.last_error.as_deref(), Some("bank said no"));
                let progress = state.progress(&expected);
                assert!(progress.is_some_and(|p| p.step == WithdrawalStep::Failed));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn command_and_event_classification() {
        let cmd = WithdrawalAction::DebitAccount {
            user_id: UserId::new(),
            account_id: PlanAccountId::new(),
            withdrawal_id: WithdrawalId::new(),
        };
        assert!(cmd.is_command());
        assert!(!cmd.is_event());
        assert_eq!(cmd.event_type(), "unknown");

        let event = WithdrawalAction::WithdrawalCompleted {
            user_id: UserId::new(),
            account_id: PlanAccountId::new(),
            withdrawal_id: WithdrawalId::new(),
            bank_transaction_id: None,
            completed_at: test_clock().now(),
        };
        assert!(event.is_event());
        assert_eq!(event.event_type(), "WithdrawalCompleted.v1");
    }
}

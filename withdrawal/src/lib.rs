//! Private-plan cash withdrawal saga.
//!
//! Processes withdrawal requests against a private-plan cash account: verify
//! funds, debit the account, instruct an external bank to transfer the
//! money, react to the bank's asynchronous response, and either finalize the
//! withdrawal or roll the debit back - ending with a best-effort user
//! notification.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   Requester  │
//! └──────┬───────┘
//!        │ RequestWithdrawal
//!        ▼
//! ┌────────────────┐      check-and-debit / credit-back      ┌────────────┐
//! │ WithdrawalSaga │◄───────────────────────────────────────►│   Ledger   │
//! └──────┬─────────┘                                         └────────────┘
//!        │ initiate transfer                                 ┌────────────┐
//!        ├──────────────────────────────────────────────────►│    Bank    │
//!        │◄· · · · · · · · · · · · · · · · · · · · · · · · ·│  Gateway   │
//!        │     asynchronous callback (BankResponseReceived)  └────────────┘
//!        │ notify success / failure                          ┌────────────┐
//!        └──────────────────────────────────────────────────►│ Notifier   │
//!                                                            └────────────┘
//! ```
//!
//! The saga is a long-running, compensable transaction with an explicit step
//! history, idempotent re-entry (step guards reject duplicate or
//! out-of-order events), and a closed failure taxonomy. Once an account is
//! debited, compensation is mandatory on every failure path; money only ever
//! returns through the single credit-back operation.
//!
//! # Key Concepts
//!
//! - **Saga Pattern**: multi-step workflow with compensation instead of a
//!   global lock/commit
//! - **Step Guards**: every operation asserts the legal current step first
//! - **Suspension Point**: after the transfer instruction, the saga waits on
//!   the out-of-band bank callback, bounded by a scheduled timeout
//! - **Audit Trails**: append-only step history and notification log on
//!   every record
//!
//! # Quick Start
//!
//! ```ignore
//! use cashout_withdrawal::{
//!     InMemoryLedger, InMemoryWithdrawalStore, RecordingNotificationSink,
//!     SagaConfig, ScriptedBankGateway, UserNotifier, WithdrawalAction,
//!     WithdrawalEnvironment, WithdrawalSaga, WithdrawalSagaState, WithdrawalService,
//! };
//! use cashout_core::environment::SystemClock;
//! use cashout_runtime::Store;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Arc::new(SystemClock);
//! let config = SagaConfig::default();
//! let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
//! let service = Arc::new(WithdrawalService::new(
//!     Arc::new(InMemoryWithdrawalStore::new(clock.clone())),
//!     ledger.clone(),
//!     Arc::new(ScriptedBankGateway::accepting()),
//!     clock.clone(),
//!     &config,
//! ));
//! let notifier = Arc::new(UserNotifier::new(
//!     Arc::new(RecordingNotificationSink::new()),
//!     service.clone(),
//!     clock.clone(),
//! ));
//! let env = WithdrawalEnvironment::new(service, notifier, clock, config);
//! let store = Store::new(WithdrawalSagaState::new(), WithdrawalSaga::new(), env);
//!
//! store.send(WithdrawalAction::RequestWithdrawal { /* ... */ }).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod notify;
pub mod ports;
pub mod saga;
pub mod service;
pub mod step;
pub mod types;

// Re-export commonly used types
pub use config::SagaConfig;
pub use error::WithdrawalError;
pub use memory::{
    InMemoryLedger, InMemoryWithdrawalStore, RecordedNotification, RecordedTransfer,
    RecordingNotificationSink, ScriptedBankGateway,
};
pub use notify::UserNotifier;
pub use ports::{
    AccountLedger, BankGateway, NotificationSink, WithdrawalStore, WithdrawalUpdate,
};
pub use saga::{
    SagaProgress, WithdrawalAction, WithdrawalEnvironment, WithdrawalSaga, WithdrawalSagaState,
};
pub use service::{
    BankResponseOutcome, DebitOutcome, SendOutcome, WithdrawalService,
};
pub use step::WithdrawalStep;
pub use types::{
    BankAccountId, BankTransactionId, BankTransferStatus, Money, NotificationKind,
    NotificationRecord, PlanAccount, PlanAccountId, StepHistoryEntry, TransactionId, UserId,
    Withdrawal, WithdrawalId, WithdrawalSource,
};

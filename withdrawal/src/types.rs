//! Domain types for private-plan cash withdrawals.
//!
//! A withdrawal moves money from a private-plan cash account to an external
//! bank account. The aggregate carries its full audit trail: every step
//! transition and every user notification ever dispatched.

use crate::step::WithdrawalStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a user
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `UserId` from a UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a private-plan cash account
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanAccountId(Uuid);

impl PlanAccountId {
    /// Creates a new random `PlanAccountId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `PlanAccountId` from a UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlanAccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanAccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a withdrawal
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WithdrawalId(Uuid);

impl WithdrawalId {
    /// Creates a new random `WithdrawalId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `WithdrawalId` from a UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WithdrawalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a destination bank account
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BankAccountId(Uuid);

impl BankAccountId {
    /// Creates a new random `BankAccountId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `BankAccountId` from a UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BankAccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BankAccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Internal transaction identifier minted when a withdrawal is created
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Creates a new random `TransactionId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier assigned by the external bank
///
/// Opaque to us; the bank's format is its own business.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BankTransactionId(String);

impl BankTransactionId {
    /// Wraps a bank-assigned transaction reference
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the bank reference as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BankTransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money amount in minor currency units (avoids floating point issues)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a new `Money` amount from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if this amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts, saturating at the numeric bound
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtracts an amount, returning `None` on underflow
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Channel through which a withdrawal was requested
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalSource {
    /// Requested by an internal system process
    System,
    /// Requested by the user over WhatsApp
    Whatsapp,
    /// Requested manually by the operations team
    Ops,
}

impl std::fmt::Display for WithdrawalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Whatsapp => write!(f, "whatsapp"),
            Self::Ops => write!(f, "ops"),
        }
    }
}

/// Where the bank transfer stands from our point of view
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankTransferStatus {
    /// No terminal answer from the bank yet
    Pending,
    /// The bank confirmed the transfer
    Accepted,
    /// The bank rejected the transfer
    Rejected,
}

/// Kind of user-facing notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Withdrawal completed
    Success,
    /// Withdrawal failed
    Failure,
}

impl NotificationKind {
    /// Metric label for this kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// One entry in a withdrawal's step history
///
/// Entries are append-only; insertion order is significant and the last
/// entry's step always equals the withdrawal's current step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepHistoryEntry {
    /// The step entered
    pub step: WithdrawalStep,
    /// How many times this step has been retried
    pub retrial_count: u32,
    /// When the step was entered
    pub at: DateTime<Utc>,
}

impl StepHistoryEntry {
    /// Creates a first-attempt entry for a step
    #[must_use]
    pub const fn new(step: WithdrawalStep, at: DateTime<Utc>) -> Self {
        Self {
            step,
            retrial_count: 0,
            at,
        }
    }
}

/// Audit record of one user notification attempt
///
/// Recorded whether or not the transport delivery succeeded; distinct from
/// the step history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Success or failure notification
    pub kind: NotificationKind,
    /// Human-readable message dispatched to the user
    pub message: String,
    /// When the attempt was made
    pub sent_at: DateTime<Utc>,
    /// The user the notification was addressed to
    pub user_id: UserId,
    /// Whether the transport accepted the delivery
    pub delivered: bool,
}

/// A withdrawal from a private-plan cash account
///
/// The aggregate under saga orchestration. `step` is the single source of
/// truth for "what to do next"; terminal records are retained for audit and
/// never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Withdrawal identifier
    pub id: WithdrawalId,
    /// Owning user
    pub user_id: UserId,
    /// Account the money leaves
    pub source_account_id: PlanAccountId,
    /// Internal transaction reference minted at creation
    pub source_transaction_id: TransactionId,
    /// External bank account the money goes to
    pub destination_bank_account_id: BankAccountId,
    /// Bank-assigned transaction reference, set on completion
    pub destination_transaction_id: Option<BankTransactionId>,
    /// Amount in cents; immutable after creation
    pub amount: Money,
    /// Current saga step
    pub step: WithdrawalStep,
    /// Retry counter for the current step
    pub step_retrial_count: u32,
    /// Append-only audit trail of step transitions
    pub step_history: Vec<StepHistoryEntry>,
    /// Append-only audit trail of user notifications
    pub notifications: Vec<NotificationRecord>,
    /// Bank transfer status
    pub bank_status: BankTransferStatus,
    /// The withdrawal reached a terminal outcome
    pub processed: bool,
    /// The transfer instruction was handed to the bank
    pub sent_to_destination: bool,
    /// The compensating credit-back was applied
    pub user_credited: bool,
    /// Free-text diagnostic set on failure transitions
    pub comment: String,
    /// Last error observed for this withdrawal
    pub last_error: Option<String>,
    /// Channel the request arrived from
    pub source: WithdrawalSource,
    /// When the withdrawal was created
    pub created_at: DateTime<Utc>,
    /// When the withdrawal was last updated
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    /// Creates a new withdrawal in the `Created` step
    ///
    /// Seeds the step history with the initial `Created` entry so the
    /// history is never empty.
    #[must_use]
    pub fn new(
        id: WithdrawalId,
        user_id: UserId,
        source_account_id: PlanAccountId,
        destination_bank_account_id: BankAccountId,
        source: WithdrawalSource,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            source_account_id,
            source_transaction_id: TransactionId::new(),
            destination_bank_account_id,
            destination_transaction_id: None,
            amount,
            step: WithdrawalStep::Created,
            step_retrial_count: 0,
            step_history: vec![StepHistoryEntry::new(WithdrawalStep::Created, now)],
            notifications: Vec::new(),
            bank_status: BankTransferStatus::Pending,
            processed: false,
            sent_to_destination: false,
            user_credited: false,
            comment: String::new(),
            last_error: None,
            source,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the step recorded by the last history entry
    #[must_use]
    pub fn last_history_step(&self) -> Option<WithdrawalStep> {
        self.step_history.last().map(|entry| entry.step)
    }

    /// The withdrawal reached `Completed` or `Failed`
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }
}

/// A private-plan cash account, as seen by the ledger collaborator
///
/// The saga only ever touches the two balance fields, and only through the
/// ledger's check-and-debit / credit-back operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanAccount {
    /// Account identifier
    pub id: PlanAccountId,
    /// Owning user
    pub user_id: UserId,
    /// Total funds. Invariant: `cash_available_for_withdrawal <= cash_balance`
    pub cash_balance: Money,
    /// Funds not locked or pending release
    pub cash_available_for_withdrawal: Money,
    /// When the account was opened
    pub created_at: DateTime<Utc>,
    /// When the account was last updated
    pub updated_at: DateTime<Utc>,
}

impl PlanAccount {
    /// Creates a new account with both balances set to `balance`
    #[must_use]
    pub const fn new(
        id: PlanAccountId,
        user_id: UserId,
        balance: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            cash_balance: balance,
            cash_available_for_withdrawal: balance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks the balance invariant
    #[must_use]
    pub fn invariant_holds(&self) -> bool {
        self.cash_available_for_withdrawal <= self.cash_balance
    }
}

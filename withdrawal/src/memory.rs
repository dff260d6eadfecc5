//! In-memory collaborator adapters.
//!
//! These back the demo binary and the test suite. The ledger and the record
//! store keep their maps behind a single async mutex each, which is what
//! makes check-and-debit / credit-back atomic per account key. The bank
//! gateway and notification sink are scriptable doubles that record every
//! call for later inspection.

use crate::error::WithdrawalError;
use crate::ports::{
    AccountLedger, BankGateway, NotificationSink, PortFuture, WithdrawalStore, WithdrawalUpdate,
};
use crate::types::{
    BankAccountId, Money, NotificationKind, PlanAccount, PlanAccountId, UserId, Withdrawal,
    WithdrawalId,
};
use cashout_core::environment::Clock;
use cashout_runtime::metrics::LedgerMetrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// In-memory account ledger.
///
/// Balances live under one mutex, so a check-and-debit can never interleave
/// with another balance mutation for the same account.
#[derive(Clone)]
pub struct InMemoryLedger {
    accounts: Arc<Mutex<HashMap<UserId, HashMap<PlanAccountId, PlanAccount>>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLedger {
    /// Creates an empty ledger
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Opens an account with both balance fields set to `balance`
    pub async fn open_account(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        balance: Money,
    ) {
        let account = PlanAccount::new(
            account_id.clone(),
            user_id.clone(),
            balance,
            self.clock.now(),
        );
        let mut accounts = self.accounts.lock().await;
        accounts.entry(user_id).or_default().insert(account_id, account);
    }

    /// Reads the available-for-withdrawal balance, for assertions and demos
    pub async fn available_balance(
        &self,
        user_id: &UserId,
        account_id: &PlanAccountId,
    ) -> Option<Money> {
        let accounts = self.accounts.lock().await;
        accounts
            .get(user_id)
            .and_then(|user| user.get(account_id))
            .map(|account| account.cash_available_for_withdrawal)
    }
}

fn find_account<'a>(
    accounts: &'a mut HashMap<UserId, HashMap<PlanAccountId, PlanAccount>>,
    user_id: &UserId,
    account_id: &PlanAccountId,
) -> Result<&'a mut PlanAccount, WithdrawalError> {
    let user_accounts = accounts
        .get_mut(user_id)
        .ok_or_else(|| WithdrawalError::UserNotFound(user_id.clone()))?;
    user_accounts
        .get_mut(account_id)
        .ok_or_else(|| WithdrawalError::AccountNotFound(account_id.clone()))
}

impl AccountLedger for InMemoryLedger {
    fn get(&self, user_id: UserId, account_id: PlanAccountId) -> PortFuture<'_, PlanAccount> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().await;
            find_account(&mut accounts, &user_id, &account_id).map(|account| account.clone())
        })
    }

    fn check_and_debit(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        amount: Money,
    ) -> PortFuture<'_, PlanAccount> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().await;
            let account = find_account(&mut accounts, &user_id, &account_id)?;

            let Some(available) = account.cash_available_for_withdrawal.checked_sub(amount)
            else {
                LedgerMetrics::record_debit_rejection();
                return Err(WithdrawalError::NotEnoughFunds {
                    account_id,
                    requested: amount,
                    available: account.cash_available_for_withdrawal,
                });
            };
            // The invariant cash_available <= cash_balance makes this
            // subtraction safe once the available check passed.
            let balance = account
                .cash_balance
                .checked_sub(amount)
                .unwrap_or(Money::from_cents(0));

            account.cash_available_for_withdrawal = available;
            account.cash_balance = balance;
            account.updated_at = self.clock.now();

            LedgerMetrics::record_debit();
            tracing::debug!(account = %account.id, amount = %amount, "Debited account");
            Ok(account.clone())
        })
    }

    fn credit_back(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        amount: Money,
    ) -> PortFuture<'_, PlanAccount> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().await;
            let account = find_account(&mut accounts, &user_id, &account_id)?;

            account.cash_available_for_withdrawal =
                account.cash_available_for_withdrawal.saturating_add(amount);
            account.cash_balance = account.cash_balance.saturating_add(amount);
            account.updated_at = self.clock.now();

            LedgerMetrics::record_credit_back();
            tracing::info!(
                account = %account.id,
                amount = %amount,
                "Credited failed withdrawal back to account"
            );
            Ok(account.clone())
        })
    }
}

/// In-memory withdrawal record store.
#[derive(Clone)]
pub struct InMemoryWithdrawalStore {
    records: Arc<Mutex<HashMap<(UserId, PlanAccountId, WithdrawalId), Withdrawal>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryWithdrawalStore {
    /// Creates an empty store
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Number of records held, for assertions
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl WithdrawalStore for InMemoryWithdrawalStore {
    fn create(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal: Withdrawal,
    ) -> PortFuture<'_, Withdrawal> {
        Box::pin(async move {
            let key = (user_id, account_id, withdrawal.id.clone());
            let mut records = self.records.lock().await;
            if records.contains_key(&key) {
                return Err(WithdrawalError::Storage(format!(
                    "withdrawal {} already exists",
                    withdrawal.id
                )));
            }
            records.insert(key, withdrawal.clone());
            Ok(withdrawal)
        })
    }

    fn get_by_id(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> PortFuture<'_, Option<Withdrawal>> {
        Box::pin(async move {
            let records = self.records.lock().await;
            Ok(records.get(&(user_id, account_id, withdrawal_id)).cloned())
        })
    }

    fn update(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
        update: WithdrawalUpdate,
    ) -> PortFuture<'_, Withdrawal> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            let withdrawal = records
                .get_mut(&(user_id, account_id, withdrawal_id.clone()))
                .ok_or(WithdrawalError::WithdrawalNotFound(withdrawal_id))?;

            update.validate(withdrawal)?;
            update.apply(withdrawal, self.clock.now());
            Ok(withdrawal.clone())
        })
    }
}

/// A transfer instruction the scripted gateway received
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedTransfer {
    /// Requesting user
    pub user_id: UserId,
    /// Destination bank account
    pub bank_account_id: BankAccountId,
    /// Withdrawal the instruction belongs to
    pub withdrawal_id: WithdrawalId,
    /// Amount to transfer
    pub amount: Money,
}

/// Scriptable bank gateway double.
///
/// Records every instruction and answers with a scripted outcome. Duplicate
/// instructions for a withdrawal id that was already accepted are absorbed,
/// which is the deduplication contract the saga relies on when events are
/// redelivered.
#[derive(Clone)]
pub struct ScriptedBankGateway {
    rejection: Arc<std::sync::Mutex<Option<String>>>,
    calls: Arc<std::sync::Mutex<Vec<RecordedTransfer>>>,
    accepted: Arc<std::sync::Mutex<HashSet<WithdrawalId>>>,
}

impl ScriptedBankGateway {
    /// A gateway that accepts every instruction
    #[must_use]
    pub fn accepting() -> Self {
        Self {
            rejection: Arc::new(std::sync::Mutex::new(None)),
            calls: Arc::new(std::sync::Mutex::new(Vec::new())),
            accepted: Arc::new(std::sync::Mutex::new(HashSet::new())),
        }
    }

    /// A gateway that rejects every instruction with `reason`
    #[must_use]
    pub fn rejecting(reason: impl Into<String>) -> Self {
        let gateway = Self::accepting();
        gateway.set_rejection(Some(reason.into()));
        gateway
    }

    /// Change the scripted outcome; `None` accepts, `Some(reason)` rejects
    pub fn set_rejection(&self, reason: Option<String>) {
        let mut rejection = self
            .rejection
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *rejection = reason;
    }

    /// Every instruction received so far
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedTransfer> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of instructions received
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl BankGateway for ScriptedBankGateway {
    fn initiate_transfer(
        &self,
        user_id: UserId,
        bank_account_id: BankAccountId,
        withdrawal_id: WithdrawalId,
        amount: Money,
    ) -> PortFuture<'_, ()> {
        Box::pin(async move {
            {
                let accepted = self
                    .accepted
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if accepted.contains(&withdrawal_id) {
                    tracing::debug!(
                        withdrawal = %withdrawal_id,
                        "Duplicate transfer instruction absorbed"
                    );
                    return Ok(());
                }
            }

            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(RecordedTransfer {
                    user_id,
                    bank_account_id,
                    withdrawal_id: withdrawal_id.clone(),
                    amount,
                });

            let rejection = self
                .rejection
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            match rejection {
                Some(reason) => Err(WithdrawalError::BankTransfer { reason }),
                None => {
                    self.accepted
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .insert(withdrawal_id);
                    Ok(())
                }
            }
        })
    }
}

/// A notification the recording sink received
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedNotification {
    /// Addressed user
    pub user_id: UserId,
    /// Account the withdrawal belonged to
    pub account_id: PlanAccountId,
    /// Withdrawal the notification concerns
    pub withdrawal_id: WithdrawalId,
    /// Success or failure
    pub kind: NotificationKind,
    /// Failure reason, for failure notifications
    pub reason: Option<String>,
}

/// Recording notification sink double.
///
/// Delivers into a vector; can be told to fail so callers' swallow-and-log
/// behavior can be exercised.
#[derive(Clone)]
pub struct RecordingNotificationSink {
    deliveries: Arc<std::sync::Mutex<Vec<RecordedNotification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotificationSink {
    /// A sink that delivers everything
    #[must_use]
    pub fn new() -> Self {
        Self {
            deliveries: Arc::new(std::sync::Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent deliveries fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every delivered notification so far
    #[must_use]
    pub fn deliveries(&self) -> Vec<RecordedNotification> {
        self.deliveries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of delivered notifications of `kind`
    #[must_use]
    pub fn delivered_count(&self, kind: NotificationKind) -> usize {
        self.deliveries()
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    fn deliver(&self, notification: RecordedNotification) -> Result<(), WithdrawalError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WithdrawalError::NotificationDelivery(
                "notification transport unavailable".to_string(),
            ));
        }
        self.deliveries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(notification);
        Ok(())
    }
}

impl Default for RecordingNotificationSink {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn notify_success(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) -> PortFuture<'_, ()> {
        Box::pin(async move {
            tracing::info!(
                user = %user_id,
                withdrawal = %withdrawal_id,
                "Success notification sent"
            );
            self.deliver(RecordedNotification {
                user_id,
                account_id,
                withdrawal_id,
                kind: NotificationKind::Success,
                reason: None,
            })
        })
    }

    fn notify_failure(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
        reason: String,
    ) -> PortFuture<'_, ()> {
        Box::pin(async move {
            tracing::warn!(
                user = %user_id,
                withdrawal = %withdrawal_id,
                reason = %reason,
                "Failure notification sent"
            );
            self.deliver(RecordedNotification {
                user_id,
                account_id,
                withdrawal_id,
                kind: NotificationKind::Failure,
                reason: Some(reason),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::WithdrawalStep;
    use crate::types::WithdrawalSource;
    use cashout_testing::test_clock;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(test_clock())
    }

    #[tokio::test]
    async fn ledger_debits_both_balance_fields() {
        let ledger = InMemoryLedger::new(clock());
        let user = UserId::new();
        let account = PlanAccountId::new();
        ledger
            .open_account(user.clone(), account.clone(), Money::from_cents(10000))
            .await;

        let result = ledger
            .check_and_debit(user.clone(), account.clone(), Money::from_cents(4000))
            .await;
        assert!(result.is_ok());
        if let Ok(updated) = result {
            assert_eq!(
                updated.cash_available_for_withdrawal,
                Money::from_cents(6000)
            );
            assert_eq!(updated.cash_balance, Money::from_cents(6000));
            assert!(updated.invariant_holds());
        }
    }

    #[tokio::test]
    async fn ledger_rejects_insufficient_funds_without_debiting() {
        let ledger = InMemoryLedger::new(clock());
        let user = UserId::new();
        let account = PlanAccountId::new();
        ledger
            .open_account(user.clone(), account.clone(), Money::from_cents(100))
            .await;

        let result = ledger
            .check_and_debit(user.clone(), account.clone(), Money::from_cents(4000))
            .await;
        assert!(matches!(
            result,
            Err(WithdrawalError::NotEnoughFunds { .. })
        ));
        assert_eq!(
            ledger.available_balance(&user, &account).await,
            Some(Money::from_cents(100))
        );
    }

    #[tokio::test]
    async fn debit_then_credit_back_is_balance_neutral() {
        let ledger = InMemoryLedger::new(clock());
        let user = UserId::new();
        let account = PlanAccountId::new();
        ledger
            .open_account(user.clone(), account.clone(), Money::from_cents(7500))
            .await;

        let amount = Money::from_cents(3000);
        let debited = ledger
            .check_and_debit(user.clone(), account.clone(), amount)
            .await;
        assert!(debited.is_ok());
        let credited = ledger
            .credit_back(user.clone(), account.clone(), amount)
            .await;
        assert!(credited.is_ok());
        if let Ok(account) = credited {
            assert_eq!(
                account.cash_available_for_withdrawal,
                Money::from_cents(7500)
            );
            assert_eq!(account.cash_balance, Money::from_cents(7500));
        }
    }

    #[tokio::test]
    async fn ledger_distinguishes_missing_user_and_account() {
        let ledger = InMemoryLedger::new(clock());
        let user = UserId::new();
        let account = PlanAccountId::new();

        let missing_user = ledger.get(user.clone(), account.clone()).await;
        assert!(matches!(missing_user, Err(WithdrawalError::UserNotFound(_))));

        ledger
            .open_account(user.clone(), PlanAccountId::new(), Money::from_cents(1))
            .await;
        let missing_account = ledger.get(user, account).await;
        assert!(matches!(
            missing_account,
            Err(WithdrawalError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn store_round_trips_and_rejects_duplicates() {
        let store = InMemoryWithdrawalStore::new(clock());
        let user = UserId::new();
        let account = PlanAccountId::new();
        let withdrawal = Withdrawal::new(
            WithdrawalId::new(),
            user.clone(),
            account.clone(),
            BankAccountId::new(),
            WithdrawalSource::System,
            Money::from_cents(500),
            test_clock().now(),
        );

        let created = store
            .create(user.clone(), account.clone(), withdrawal.clone())
            .await;
        assert!(created.is_ok());

        let duplicate = store
            .create(user.clone(), account.clone(), withdrawal.clone())
            .await;
        assert!(matches!(duplicate, Err(WithdrawalError::Storage(_))));

        let fetched = store
            .get_by_id(user, account, withdrawal.id.clone())
            .await;
        assert!(matches!(fetched, Ok(Some(w)) if w.id == withdrawal.id));
    }

    #[tokio::test]
    async fn store_update_enforces_transitions() {
        let store = InMemoryWithdrawalStore::new(clock());
        let user = UserId::new();
        let account = PlanAccountId::new();
        let withdrawal = Withdrawal::new(
            WithdrawalId::new(),
            user.clone(),
            account.clone(),
            BankAccountId::new(),
            WithdrawalSource::System,
            Money::from_cents(500),
            test_clock().now(),
        );
        let id = withdrawal.id.clone();
        let _ = store
            .create(user.clone(), account.clone(), withdrawal)
            .await;

        let illegal = store
            .update(
                user.clone(),
                account.clone(),
                id.clone(),
                WithdrawalUpdate::step_change(WithdrawalStep::Completed, test_clock().now()),
            )
            .await;
        assert!(matches!(
            illegal,
            Err(WithdrawalError::PreconditionFailed { .. })
        ));

        let legal = store
            .update(
                user,
                account,
                id,
                WithdrawalUpdate::step_change(WithdrawalStep::Debiting, test_clock().now()),
            )
            .await;
        assert!(matches!(legal, Ok(w) if w.step == WithdrawalStep::Debiting));
    }

    #[tokio::test]
    async fn gateway_absorbs_duplicate_instructions() {
        let gateway = ScriptedBankGateway::accepting();
        let withdrawal_id = WithdrawalId::new();

        let first = gateway
            .initiate_transfer(
                UserId::new(),
                BankAccountId::new(),
                withdrawal_id.clone(),
                Money::from_cents(100),
            )
            .await;
        assert!(first.is_ok());

        let second = gateway
            .initiate_transfer(
                UserId::new(),
                BankAccountId::new(),
                withdrawal_id,
                Money::from_cents(100),
            )
            .await;
        assert!(second.is_ok());
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn rejecting_gateway_returns_bank_transfer_error() {
        let gateway = ScriptedBankGateway::rejecting("bank offline");
        let result = gateway
            .initiate_transfer(
                UserId::new(),
                BankAccountId::new(),
                WithdrawalId::new(),
                Money::from_cents(100),
            )
            .await;
        assert!(matches!(
            result,
            Err(WithdrawalError::BankTransfer { reason }) if reason == "bank offline"
        ));
    }

    #[tokio::test]
    async fn failing_sink_reports_delivery_error() {
        let sink = RecordingNotificationSink::new();
        sink.set_failing(true);

        let result = sink
            .notify_success(UserId::new(), PlanAccountId::new(), WithdrawalId::new())
            .await;
        assert!(matches!(
            result,
            Err(WithdrawalError::NotificationDelivery(_))
        ));
        assert!(sink.deliveries().is_empty());
    }
}

//! Best-effort user notification on terminal withdrawal states.
//!
//! Fire-and-forget from the saga's perspective: transport failures are
//! caught, logged, and never re-thrown into the saga or allowed to block the
//! withdrawal. Every attempt - delivered or not - is appended to the
//! withdrawal's `notifications` audit trail, distinct from the step history.

use crate::service::WithdrawalService;
use crate::ports::NotificationSink;
use crate::types::{NotificationKind, NotificationRecord, PlanAccountId, UserId, WithdrawalId};
use cashout_core::environment::Clock;
use cashout_runtime::metrics::NotificationMetrics;
use std::sync::Arc;

/// Dispatches terminal-state notifications and records every attempt.
pub struct UserNotifier {
    sink: Arc<dyn NotificationSink>,
    service: Arc<WithdrawalService>,
    clock: Arc<dyn Clock>,
}

impl UserNotifier {
    /// Wire a notifier from its sink and the record-keeping service
    #[must_use]
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        service: Arc<WithdrawalService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sink,
            service,
            clock,
        }
    }

    /// Tell the user their withdrawal completed.
    pub async fn notify_success(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
    ) {
        let message = format!("Withdrawal {withdrawal_id} completed successfully");
        let delivered = match self
            .sink
            .notify_success(user_id.clone(), account_id.clone(), withdrawal_id.clone())
            .await
        {
            Ok(()) => {
                NotificationMetrics::record_sent(NotificationKind::Success.as_str());
                true
            }
            Err(err) => {
                NotificationMetrics::record_failed(NotificationKind::Success.as_str());
                tracing::warn!(
                    withdrawal = %withdrawal_id,
                    error = %err,
                    "Success notification delivery failed"
                );
                false
            }
        };

        self.record(
            user_id,
            account_id,
            withdrawal_id,
            NotificationKind::Success,
            message,
            delivered,
        )
        .await;
    }

    /// Tell the user their withdrawal failed and why.
    pub async fn notify_failure(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
        reason: String,
    ) {
        let message = format!("Withdrawal {withdrawal_id} failed: {reason}");
        let delivered = match self
            .sink
            .notify_failure(
                user_id.clone(),
                account_id.clone(),
                withdrawal_id.clone(),
                reason,
            )
            .await
        {
            Ok(()) => {
                NotificationMetrics::record_sent(NotificationKind::Failure.as_str());
                true
            }
            Err(err) => {
                NotificationMetrics::record_failed(NotificationKind::Failure.as_str());
                tracing::warn!(
                    withdrawal = %withdrawal_id,
                    error = %err,
                    "Failure notification delivery failed"
                );
                false
            }
        };

        self.record(
            user_id,
            account_id,
            withdrawal_id,
            NotificationKind::Failure,
            message,
            delivered,
        )
        .await;
    }

    /// Append the attempt to the withdrawal's notification audit trail.
    ///
    /// Bookkeeping failures are logged and swallowed; the notification was
    /// already (not) delivered and the saga must not stall on audit writes.
    async fn record(
        &self,
        user_id: UserId,
        account_id: PlanAccountId,
        withdrawal_id: WithdrawalId,
        kind: NotificationKind,
        message: String,
        delivered: bool,
    ) {
        let record = NotificationRecord {
            kind,
            message,
            sent_at: self.clock.now(),
            user_id: user_id.clone(),
            delivered,
        };
        if let Err(err) = self
            .service
            .record_notification(user_id, account_id, withdrawal_id.clone(), record)
            .await
        {
            tracing::error!(
                withdrawal = %withdrawal_id,
                error = %err,
                "Failed to record notification attempt"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SagaConfig;
    use crate::memory::{
        InMemoryLedger, InMemoryWithdrawalStore, RecordingNotificationSink, ScriptedBankGateway,
    };
    use crate::types::{BankAccountId, Money, WithdrawalSource};
    use cashout_testing::test_clock;

    struct Fixture {
        notifier: UserNotifier,
        service: Arc<WithdrawalService>,
        sink: RecordingNotificationSink,
        user: UserId,
        account: PlanAccountId,
        withdrawal_id: WithdrawalId,
    }

    async fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        let ledger = InMemoryLedger::new(Arc::clone(&clock));
        let sink = RecordingNotificationSink::new();
        let store = InMemoryWithdrawalStore::new(Arc::clone(&clock));

        let user = UserId::new();
        let account = PlanAccountId::new();
        ledger
            .open_account(user.clone(), account.clone(), Money::from_cents(10000))
            .await;

        let service = Arc::new(WithdrawalService::new(
            Arc::new(store),
            Arc::new(ledger),
            Arc::new(ScriptedBankGateway::accepting()),
            Arc::clone(&clock),
            &SagaConfig::default(),
        ));

        let withdrawal = match service
            .create_withdrawal(
                user.clone(),
                account.clone(),
                BankAccountId::new(),
                WithdrawalSource::System,
                Money::from_cents(1000),
            )
            .await
        {
            Ok(withdrawal) => withdrawal,
            Err(err) => unreachable!("fixture create failed: {err}"),
        };

        let notifier = UserNotifier::new(
            Arc::new(sink.clone()),
            Arc::clone(&service),
            clock,
        );

        Fixture {
            notifier,
            service,
            sink,
            user,
            account,
            withdrawal_id: withdrawal.id,
        }
    }

    #[tokio::test]
    async fn success_notification_is_delivered_and_recorded() {
        let fixture = fixture().await;
        fixture
            .notifier
            .notify_success(
                fixture.user.clone(),
                fixture.account.clone(),
                fixture.withdrawal_id.clone(),
            )
            .await;

        assert_eq!(fixture.sink.delivered_count(NotificationKind::Success), 1);

        let record = fixture
            .service
            .get_by_id(
                fixture.user.clone(),
                fixture.account.clone(),
                fixture.withdrawal_id.clone(),
            )
            .await;
        let Ok(record) = record else {
            unreachable!("record must exist");
        };
        assert_eq!(record.notifications.len(), 1);
        assert!(record.notifications[0].delivered);
        assert_eq!(record.notifications[0].kind, NotificationKind::Success);
    }

    #[tokio::test]
    async fn failed_delivery_is_still_recorded() {
        let fixture = fixture().await;
        fixture.sink.set_failing(true);

        fixture
            .notifier
            .notify_failure(
                fixture.user.clone(),
                fixture.account.clone(),
                fixture.withdrawal_id.clone(),
                "bank said no".to_string(),
            )
            .await;

        // Transport saw nothing...
        assert!(fixture.sink.deliveries().is_empty());

        // ...but the attempt is on the audit trail.
        let record = fixture
            .service
            .get_by_id(
                fixture.user.clone(),
                fixture.account.clone(),
                fixture.withdrawal_id.clone(),
            )
            .await;
        let Ok(record) = record else {
            unreachable!("record must exist");
        };
        assert_eq!(record.notifications.len(), 1);
        assert!(!record.notifications[0].delivered);
        assert!(record.notifications[0].message.contains("bank said no"));
    }
}

//! CLI demo for the withdrawal saga.
//!
//! Wires the saga against in-memory collaborators and runs three scenarios:
//! a completed withdrawal, an insufficient-funds short circuit, and a bank
//! rejection with compensation.

use cashout_core::environment::{Clock, SystemClock};
use cashout_runtime::Store;
use cashout_runtime::metrics::MetricsServer;
use cashout_withdrawal::{
    AccountLedger, BankGateway, BankTransactionId, InMemoryLedger, InMemoryWithdrawalStore, Money,
    NotificationSink, PlanAccountId, RecordingNotificationSink, SagaConfig, ScriptedBankGateway,
    UserId, UserNotifier, WithdrawalAction, WithdrawalEnvironment, WithdrawalId, WithdrawalSaga,
    WithdrawalSagaState, WithdrawalService, WithdrawalSource, WithdrawalStep,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

type SagaStore =
    Store<WithdrawalSagaState, WithdrawalAction, WithdrawalEnvironment, WithdrawalSaga>;

struct Demo {
    store: SagaStore,
    service: Arc<WithdrawalService>,
    ledger: Arc<InMemoryLedger>,
    sink: Arc<RecordingNotificationSink>,
    user: UserId,
    account: PlanAccountId,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Best-effort metrics endpoint; the demo works without it.
    let mut metrics = MetricsServer::new("127.0.0.1:9090".parse()?);
    if let Err(err) = metrics.start() {
        tracing::warn!(error = %err, "Metrics server not started");
    }

    println!("=== Cashout: Private-Plan Withdrawal Saga ===\n");

    let demo = wire_demo().await;

    happy_path(&demo).await?;
    insufficient_funds(&demo).await?;
    bank_rejection(&demo).await?;

    println!("\n=== Demo Complete ===");
    println!("\nKey behaviors demonstrated:");
    println!("- Exactly-once debit guarded by the withdrawal step machine");
    println!("- Suspension on the asynchronous bank callback, with a timeout bound");
    println!("- Mandatory compensation (credit-back) on failures after the debit");
    println!("- Best-effort user notification recorded on the withdrawal audit trail");

    demo.store.shutdown(Duration::from_secs(5)).await.ok();
    Ok(())
}

async fn wire_demo() -> Demo {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let config = SagaConfig::default().with_bank_response_timeout(Duration::from_secs(5));

    let ledger = Arc::new(InMemoryLedger::new(Arc::clone(&clock)));
    let bank = Arc::new(ScriptedBankGateway::accepting());
    let sink = Arc::new(RecordingNotificationSink::new());
    let record_store = Arc::new(InMemoryWithdrawalStore::new(Arc::clone(&clock)));

    let user = UserId::new();
    let account = PlanAccountId::new();
    ledger
        .open_account(user.clone(), account.clone(), Money::from_cents(100_00))
        .await;

    let service = Arc::new(WithdrawalService::new(
        record_store,
        Arc::clone(&ledger) as Arc<dyn AccountLedger>,
        Arc::clone(&bank) as Arc<dyn BankGateway>,
        Arc::clone(&clock),
        &config,
    ));
    let notifier = Arc::new(UserNotifier::new(
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        Arc::clone(&service),
        Arc::clone(&clock),
    ));
    let env = WithdrawalEnvironment::new(
        Arc::clone(&service),
        notifier,
        Arc::clone(&clock),
        config,
    );
    let store = Store::new(WithdrawalSagaState::new(), WithdrawalSaga::new(), env);

    Demo {
        store,
        service,
        ledger,
        sink,
        user,
        account,
    }
}

/// Drive a request until the saga suspends on the bank or fails outright.
async fn request(demo: &Demo, amount: Money) -> anyhow::Result<WithdrawalAction> {
    let action = demo
        .store
        .send_and_wait_for(
            WithdrawalAction::RequestWithdrawal {
                user_id: demo.user.clone(),
                account_id: demo.account.clone(),
                bank_account_id: cashout_withdrawal::BankAccountId::new(),
                source: WithdrawalSource::Ops,
                amount,
            },
            |action| {
                matches!(
                    action,
                    WithdrawalAction::WithdrawalSentToBank { .. }
                        | WithdrawalAction::WithdrawalFailed { .. }
                )
            },
            Duration::from_secs(10),
        )
        .await?;
    Ok(action)
}

/// Inject the bank's asynchronous callback and wait for the terminal event.
async fn deliver_callback(
    demo: &Demo,
    withdrawal_id: WithdrawalId,
    success: bool,
    error_reason: Option<String>,
) -> anyhow::Result<()> {
    demo.store
        .send_and_wait_for(
            WithdrawalAction::BankResponseReceived {
                user_id: demo.user.clone(),
                account_id: demo.account.clone(),
                withdrawal_id,
                success,
                bank_transaction_id: success.then(|| BankTransactionId::new("bank-txn-0001")),
                error_reason,
                received_at: SystemClock.now(),
            },
            |action| {
                matches!(
                    action,
                    WithdrawalAction::WithdrawalCompleted { .. }
                        | WithdrawalAction::WithdrawalFailed { .. }
                )
            },
            Duration::from_secs(10),
        )
        .await?;
    Ok(())
}

async fn print_record(demo: &Demo, withdrawal_id: WithdrawalId) -> anyhow::Result<()> {
    // The terminal notification runs just after the terminal event; give it
    // a beat to land on the audit trail.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = demo
        .service
        .get_by_id(demo.user.clone(), demo.account.clone(), withdrawal_id)
        .await?;

    println!("  step: {}", record.step);
    let steps: Vec<&str> = record
        .step_history
        .iter()
        .map(|entry| entry.step.as_str())
        .collect();
    println!("  history: {}", steps.join(" -> "));
    for notification in &record.notifications {
        println!(
            "  notification ({}): {}",
            if notification.delivered { "delivered" } else { "not delivered" },
            notification.message
        );
    }
    let available = demo
        .ledger
        .available_balance(&demo.user, &demo.account)
        .await
        .unwrap_or(Money::from_cents(0));
    println!("  available balance: {available}");
    Ok(())
}

async fn happy_path(demo: &Demo) -> anyhow::Result<()> {
    println!("--- Scenario 1: successful withdrawal of $50.00 ---");
    let action = request(demo, Money::from_cents(50_00)).await?;
    let WithdrawalAction::WithdrawalSentToBank { withdrawal_id, .. } = action else {
        anyhow::bail!("expected the withdrawal to reach the bank, got {action:?}");
    };
    info!(withdrawal = %withdrawal_id, "Suspended on bank; delivering success callback");

    deliver_callback(demo, withdrawal_id.clone(), true, None).await?;
    print_record(demo, withdrawal_id).await?;
    Ok(())
}

async fn insufficient_funds(demo: &Demo) -> anyhow::Result<()> {
    println!("\n--- Scenario 2: withdrawal of $500.00 with $50.00 available ---");
    let action = request(demo, Money::from_cents(500_00)).await?;
    let WithdrawalAction::WithdrawalFailed { withdrawal_id, reason, .. } = action else {
        anyhow::bail!("expected the withdrawal to fail, got {action:?}");
    };
    println!("  failed as expected: {reason}");
    print_record(demo, withdrawal_id).await?;
    Ok(())
}

async fn bank_rejection(demo: &Demo) -> anyhow::Result<()> {
    println!("\n--- Scenario 3: bank rejects a withdrawal of $30.00 ---");
    let action = request(demo, Money::from_cents(30_00)).await?;
    let WithdrawalAction::WithdrawalSentToBank { withdrawal_id, .. } = action else {
        anyhow::bail!("expected the withdrawal to reach the bank, got {action:?}");
    };
    info!(withdrawal = %withdrawal_id, "Suspended on bank; delivering failure callback");

    deliver_callback(
        demo,
        withdrawal_id.clone(),
        false,
        Some("Invalid transfer".to_string()),
    )
    .await?;

    // Compensation credited the amount back; the record tells the story.
    print_record(demo, withdrawal_id.clone()).await?;

    let record = demo
        .service
        .get_by_id(demo.user.clone(), demo.account.clone(), withdrawal_id)
        .await?;
    debug_assert_eq!(record.step, WithdrawalStep::Failed);
    println!(
        "  compensated: user_credited = {}, notifications = {}",
        record.user_credited,
        demo.sink.deliveries().len()
    );
    Ok(())
}

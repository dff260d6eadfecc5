//! Integration tests for the Store's action feedback loop and broadcasting.
//!
//! Exercises the observation features the withdrawal saga relies on: waiting
//! for a terminal action with `send_and_wait_for`, streaming feedback actions
//! with `subscribe_actions`, and multi-step effect chains that re-enter the
//! reducer.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use cashout_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use cashout_runtime::{Store, StoreError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum PayoutAction {
    /// Start a multi-step payout chain with a correlation id
    StartPayout { id: u64 },
    /// One step of the chain finished
    StepFinished { id: u64, step: u32 },
    /// Terminal: chain finished
    PayoutSettled { id: u64 },
    /// Command with no feedback actions
    Bump,
}

#[derive(Debug, Clone, Default)]
struct PayoutState {
    counter: u32,
    steps_seen: Vec<u32>,
}

#[derive(Clone)]
struct PayoutEnvironment;

#[derive(Clone)]
struct PayoutReducer;

impl Reducer for PayoutReducer {
    type State = PayoutState;
    type Action = PayoutAction;
    type Environment = PayoutEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        _env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            PayoutAction::StartPayout { id } => {
                state.steps_seen.clear();
                smallvec![Effect::future(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Some(PayoutAction::StepFinished { id, step: 1 })
                })]
            }

            PayoutAction::StepFinished { id, step } => {
                state.steps_seen.push(step);

                if step < 3 {
                    smallvec![Effect::future(async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Some(PayoutAction::StepFinished { id, step: step + 1 })
                    })]
                } else {
                    smallvec![Effect::future(async move {
                        Some(PayoutAction::PayoutSettled { id })
                    })]
                }
            }

            PayoutAction::PayoutSettled { .. } => smallvec![Effect::None],

            PayoutAction::Bump => {
                state.counter += 1;
                smallvec![Effect::None]
            }
        }
    }
}

fn store() -> Store<PayoutState, PayoutAction, PayoutEnvironment, PayoutReducer> {
    Store::new(PayoutState::default(), PayoutReducer, PayoutEnvironment)
}

/// A chain of effects re-enters the reducer until the terminal action, and
/// `send_and_wait_for` resolves on exactly that action.
#[tokio::test]
async fn wait_for_resolves_on_terminal_action() {
    let store = store();

    let result = store
        .send_and_wait_for(
            PayoutAction::StartPayout { id: 7 },
            |action| matches!(action, PayoutAction::PayoutSettled { .. }),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(result, PayoutAction::PayoutSettled { id: 7 });

    // Every step of the chain went through the reducer, in order.
    let steps = store.state(|s| s.steps_seen.clone()).await;
    assert_eq!(steps, vec![1, 2, 3]);
}

/// Actions that never produce the awaited terminal action time out.
#[tokio::test]
async fn wait_for_times_out_without_terminal_action() {
    let store = store();

    let result = store
        .send_and_wait_for(
            PayoutAction::Bump,
            |action| matches!(action, PayoutAction::PayoutSettled { .. }),
            Duration::from_millis(100),
        )
        .await;

    assert!(matches!(result, Err(StoreError::Timeout)));
    assert_eq!(store.state(|s| s.counter).await, 1);
}

/// Observers receive every feedback action, in reducer order.
#[tokio::test]
async fn subscribers_see_the_whole_chain() {
    let store = store();
    let mut rx = store.subscribe_actions();

    store.send(PayoutAction::StartPayout { id: 3 }).await.unwrap();

    let mut observed = Vec::new();
    while observed.len() < 4 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Ok(action)) => observed.push(action),
            other => panic!("broadcast stream ended early: {other:?}"),
        }
    }

    assert_eq!(
        observed,
        vec![
            PayoutAction::StepFinished { id: 3, step: 1 },
            PayoutAction::StepFinished { id: 3, step: 2 },
            PayoutAction::StepFinished { id: 3, step: 3 },
            PayoutAction::PayoutSettled { id: 3 },
        ]
    );
}

/// Two interleaved chains are distinguished by their correlation ids.
#[tokio::test]
async fn concurrent_chains_are_distinguished_by_id() {
    let store = store();
    let mut rx = store.subscribe_actions();

    store.send(PayoutAction::StartPayout { id: 1 }).await.unwrap();
    store.send(PayoutAction::StartPayout { id: 2 }).await.unwrap();

    let mut settled = Vec::new();
    while settled.len() < 2 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Ok(PayoutAction::PayoutSettled { id })) => settled.push(id),
            Ok(Ok(_)) => {}
            other => panic!("broadcast stream ended early: {other:?}"),
        }
    }

    settled.sort_unstable();
    assert_eq!(settled, vec![1, 2]);
}

/// Shutdown waits for in-flight effect chains before completing.
#[tokio::test]
async fn shutdown_drains_pending_effects() {
    let store = store();

    store.send(PayoutAction::StartPayout { id: 9 }).await.unwrap();

    // The chain takes ~30ms of sleeps; shutdown must outwait it.
    let result = store.shutdown(Duration::from_secs(5)).await;
    assert!(result.is_ok());

    let send_after = store.send(PayoutAction::Bump).await;
    assert!(matches!(send_after, Err(StoreError::ShutdownInProgress)));
}

//! Tests for #[derive(Action)] macro

use cashout_macros::Action;
use chrono::{DateTime, Utc};

#[derive(Action, Clone, Debug, PartialEq)]
enum PayoutAction {
    #[command]
    RequestPayout {
        account_id: String,
        amount_cents: u64,
    },

    #[command]
    CancelPayout,

    #[command]
    SettlePayout {
        reference: String,
    },

    #[event]
    PayoutRequested {
        payout_id: String,
        amount_cents: u64,
        requested_at: DateTime<Utc>,
    },

    #[event]
    PayoutSettled {
        payout_id: String,
        settled_at: DateTime<Utc>,
    },

    #[event]
    PayoutRejected {
        payout_id: String,
        reason: String,
        rejected_at: DateTime<Utc>,
    },
}

#[test]
fn test_is_command() {
    let action = PayoutAction::RequestPayout {
        account_id: "acc-1".to_string(),
        amount_cents: 5000,
    };
    assert!(action.is_command());
    assert!(!action.is_event());
}

#[test]
fn test_is_event() {
    let action = PayoutAction::PayoutRequested {
        payout_id: "payout-1".to_string(),
        amount_cents: 5000,
        requested_at: Utc::now(),
    };
    assert!(!action.is_command());
    assert!(action.is_event());
}

#[test]
fn test_event_type() {
    let action = PayoutAction::PayoutSettled {
        payout_id: "payout-1".to_string(),
        settled_at: Utc::now(),
    };
    assert_eq!(action.event_type(), "PayoutSettled.v1");
}

#[test]
fn test_command_event_type() {
    let action = PayoutAction::CancelPayout;
    // Commands don't have event types
    assert_eq!(action.event_type(), "unknown");
}

#[test]
fn test_unit_variant_command() {
    let action = PayoutAction::CancelPayout;
    assert!(action.is_command());
    assert!(!action.is_event());
}

#[test]
fn test_all_commands_identified() {
    let commands = vec![
        PayoutAction::RequestPayout {
            account_id: "acc-1".to_string(),
            amount_cents: 100,
        },
        PayoutAction::CancelPayout,
        PayoutAction::SettlePayout {
            reference: "ref-1".to_string(),
        },
    ];

    for cmd in commands {
        assert!(cmd.is_command(), "Expected command: {cmd:?}");
        assert!(!cmd.is_event(), "Should not be event: {cmd:?}");
    }
}

#[test]
fn test_all_events_identified() {
    let events = vec![
        PayoutAction::PayoutRequested {
            payout_id: "1".to_string(),
            amount_cents: 100,
            requested_at: Utc::now(),
        },
        PayoutAction::PayoutSettled {
            payout_id: "1".to_string(),
            settled_at: Utc::now(),
        },
        PayoutAction::PayoutRejected {
            payout_id: "1".to_string(),
            reason: "no funds".to_string(),
            rejected_at: Utc::now(),
        },
    ];

    for event in events {
        assert!(!event.is_command(), "Should not be command: {event:?}");
        assert!(event.is_event(), "Expected event: {event:?}");
    }
}

#[test]
fn test_event_types_unique() {
    let events = vec![
        (
            PayoutAction::PayoutRequested {
                payout_id: "1".to_string(),
                amount_cents: 100,
                requested_at: Utc::now(),
            },
            "PayoutRequested.v1",
        ),
        (
            PayoutAction::PayoutSettled {
                payout_id: "1".to_string(),
                settled_at: Utc::now(),
            },
            "PayoutSettled.v1",
        ),
        (
            PayoutAction::PayoutRejected {
                payout_id: "1".to_string(),
                reason: "no funds".to_string(),
                rejected_at: Utc::now(),
            },
            "PayoutRejected.v1",
        ),
    ];

    for (event, expected_type) in events {
        assert_eq!(event.event_type(), expected_type);
    }
}

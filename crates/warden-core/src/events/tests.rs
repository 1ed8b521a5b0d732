use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::*;
use crate::action::ActionKind;

fn rejected_event(revoked: bool) -> GovernanceEvent {
    GovernanceEvent::ActionRejected {
        approval_id: Uuid::new_v4(),
        action_id: Uuid::new_v4(),
        reason: Some("because".to_string()),
        revoked,
    }
}

fn executed_event() -> GovernanceEvent {
    GovernanceEvent::ActionExecuted {
        action_id: Uuid::new_v4(),
        kind: ActionKind::QueryStatus,
        agent_id: "agent-1".to_string(),
    }
}

#[test]
fn handlers_receive_only_their_kind() {
    let bus = EventBus::new();
    let rejected = Arc::new(AtomicUsize::new(0));
    let executed = Arc::new(AtomicUsize::new(0));

    let rejected_count = Arc::clone(&rejected);
    bus.subscribe(EventKind::ActionRejected, move |_| {
        rejected_count.fetch_add(1, Ordering::SeqCst);
    });
    let executed_count = Arc::clone(&executed);
    bus.subscribe(EventKind::ActionExecuted, move |_| {
        executed_count.fetch_add(1, Ordering::SeqCst);
    });

    bus.emit(&rejected_event(false));
    bus.emit(&executed_event());
    bus.emit(&executed_event());

    assert_eq!(rejected.load(Ordering::SeqCst), 1);
    assert_eq!(executed.load(Ordering::SeqCst), 2);
}

#[test]
fn unsubscribe_stops_delivery() {
    let bus = EventBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    let count_cb = Arc::clone(&count);
    let sub = bus.subscribe(EventKind::ActionExecuted, move |_| {
        count_cb.fetch_add(1, Ordering::SeqCst);
    });

    bus.emit(&executed_event());
    sub.unsubscribe();
    bus.emit(&executed_event());

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(bus.handler_count(EventKind::ActionExecuted), 0);
}

#[test]
fn panicking_handler_does_not_block_siblings() {
    let bus = EventBus::new();
    bus.subscribe(EventKind::ActionExecuted, |_| panic!("handler bug"));
    let count = Arc::new(AtomicUsize::new(0));
    let count_cb = Arc::clone(&count);
    bus.subscribe(EventKind::ActionExecuted, move |_| {
        count_cb.fetch_add(1, Ordering::SeqCst);
    });

    bus.emit(&executed_event());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn subscription_handle_outlives_bus() {
    let bus = EventBus::new();
    let sub = bus.subscribe(EventKind::ActionExecuted, |_| {});
    drop(bus);
    // The handle holds only a weak reference; unsubscribing now is inert.
    sub.unsubscribe();
}

#[test]
fn registration_during_dispatch_is_safe() {
    let bus = EventBus::new();
    let bus_inner = bus.clone();
    let added = Arc::new(Mutex::new(Vec::new()));
    let added_cb = Arc::clone(&added);
    bus.subscribe(EventKind::ActionExecuted, move |_| {
        // Re-entrant subscription while dispatch iterates a snapshot.
        let sub = bus_inner.subscribe(EventKind::ActionExecuted, |_| {});
        added_cb.lock().unwrap().push(sub.id());
    });

    bus.emit(&executed_event());
    assert_eq!(added.lock().unwrap().len(), 1);
    assert_eq!(bus.handler_count(EventKind::ActionExecuted), 2);
}

#[test]
fn severity_table_matches_taxonomy() {
    assert_eq!(rejected_event(false).severity(), Severity::Warning);
    assert_eq!(rejected_event(true).severity(), Severity::Critical);
    assert_eq!(executed_event().severity(), Severity::Info);
    assert_eq!(
        GovernanceEvent::EmergencyStop {
            revoked_approvals: 2,
            reason: "incident".to_string(),
        }
        .severity(),
        Severity::Critical
    );
    assert_eq!(
        GovernanceEvent::EmergencyStop {
            revoked_approvals: 0,
            reason: String::new(),
        }
        .kind(),
        EventKind::ActionRejected
    );
    assert_eq!(
        GovernanceEvent::AuditTamperDetected {
            sequence: 1,
            reason: crate::audit::TamperReason::EntryHashMismatch,
        }
        .severity(),
        Severity::Critical
    );
}

#[test]
fn kind_names_are_kebab_case() {
    assert_eq!(EventKind::ClearanceViolation.as_str(), "clearance-violation");
    assert_eq!(
        serde_json::to_string(&EventKind::AuditTamperDetected).unwrap(),
        "\"audit-tamper-detected\""
    );
}

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

use super::*;
use crate::action::{ActionKind, ActionRequest};
use crate::approval::{ApprovalRequest, ApprovalState};
use crate::clearance::ClearanceLevel;
use crate::events::{EventBus, EventKind, GovernanceEvent};
use crate::identity::AgentIdentity;

fn engine() -> (EnforcementEngine, EventBus) {
    let bus = EventBus::new();
    (EnforcementEngine::new(bus.clone()), bus)
}

fn agent(clearance: ClearanceLevel) -> AgentIdentity {
    AgentIdentity::new("agent-1", "worker", clearance, "sess-1")
}

fn request(kind: ActionKind) -> ActionRequest {
    ActionRequest::new(
        kind,
        "agent-1",
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
        json!({"resourceId": "r-1"}),
    )
}

fn approval(action: &ActionRequest, state: ApprovalState) -> ApprovalRequest {
    ApprovalRequest {
        id: Uuid::new_v4(),
        action_id: action.id,
        action_kind: action.kind,
        state,
        requester: agent(ClearanceLevel::L2),
        created_at: action.created_at,
        approver_ids: vec!["ap-1".to_string()],
        decided_by: None,
        decided_at: None,
        rejection_reason: Some("risky".to_string()),
        expires_at: action.created_at + chrono::Duration::minutes(5),
        evidence_hash: "feed".to_string(),
    }
}

fn capture(bus: &EventBus, kind: EventKind) -> Arc<Mutex<Vec<GovernanceEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(kind, move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    seen
}

#[test]
fn validate_flags_approval_only_for_allowed_l2() {
    let (engine, _bus) = engine();

    let verdict = engine.validate(&request(ActionKind::QueryStatus), &agent(ClearanceLevel::L0));
    assert!(verdict.allowed);
    assert!(!verdict.requires_approval);
    assert!(verdict.reason.is_none());

    let verdict = engine.validate(
        &request(ActionKind::DestroyResource),
        &agent(ClearanceLevel::L2),
    );
    assert!(verdict.allowed);
    assert!(verdict.requires_approval);

    let verdict = engine.validate(&request(ActionKind::ModifyConfig), &agent(ClearanceLevel::L0));
    assert!(!verdict.allowed);
    assert!(!verdict.requires_approval);
    let reason = verdict.reason.unwrap();
    assert!(reason.contains("Insufficient clearance"));
    assert!(reason.contains("L1"));
    assert!(reason.contains("L0"));
}

#[test]
fn clearance_violation_emits_one_critical_event() {
    let (engine, bus) = engine();
    let violations = capture(&bus, EventKind::ClearanceViolation);

    let action = request(ActionKind::ModifyConfig);
    let decision = engine.pre_execute(&action, &agent(ClearanceLevel::L0), None);
    assert!(matches!(
        decision,
        PreDecision::ClearanceViolation {
            required: ClearanceLevel::L1,
            actual: ClearanceLevel::L0,
            ..
        }
    ));

    let events = violations.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity(), crate::events::Severity::Critical);
    match &events[0] {
        GovernanceEvent::ClearanceViolation {
            action_id,
            required,
            actual,
            ..
        } => {
            assert_eq!(*action_id, action.id);
            assert_eq!(*required, ClearanceLevel::L1);
            assert_eq!(*actual, ClearanceLevel::L0);
        },
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn repeat_of_an_executed_id_is_refused() {
    let (engine, _bus) = engine();
    let action = request(ActionKind::QueryStatus);
    let worker = agent(ClearanceLevel::L0);

    assert!(matches!(
        engine.pre_execute(&action, &worker, None),
        PreDecision::Proceed { .. }
    ));
    engine.post_execute(&action, &worker, None);

    assert!(matches!(
        engine.pre_execute(&action, &worker, None),
        PreDecision::AlreadyExecuted
    ));

    // A fresh id for the same kind sails through.
    let retry = request(ActionKind::QueryStatus);
    assert!(matches!(
        engine.pre_execute(&retry, &worker, None),
        PreDecision::Proceed { .. }
    ));
}

#[test]
fn failed_executions_also_mark_the_id() {
    let (engine, _bus) = engine();
    let action = request(ActionKind::QueryStatus);
    let worker = agent(ClearanceLevel::L0);

    engine.post_execute(&action, &worker, Some("boom"));
    assert!(matches!(
        engine.pre_execute(&action, &worker, None),
        PreDecision::AlreadyExecuted
    ));
    assert_eq!(engine.executed_count(), 1);
}

#[test]
fn l2_branches_on_approval_state() {
    let (engine, _bus) = engine();
    let operator = agent(ClearanceLevel::L2);
    let action = request(ActionKind::DestroyResource);

    assert!(matches!(
        engine.pre_execute(&action, &operator, None),
        PreDecision::ApprovalRequired
    ));

    let pending = approval(&action, ApprovalState::Pending);
    assert!(matches!(
        engine.pre_execute(&action, &operator, Some(&pending)),
        PreDecision::AwaitingApproval { .. }
    ));

    let approved = approval(&action, ApprovalState::Approved);
    match engine.pre_execute(&action, &operator, Some(&approved)) {
        PreDecision::Proceed {
            approval: Some(attached),
            ..
        } => assert_eq!(attached.id, approved.id),
        other => panic!("unexpected decision: {other:?}"),
    }

    for state in [
        ApprovalState::Rejected,
        ApprovalState::Expired,
        ApprovalState::Revoked,
    ] {
        let terminal = approval(&action, state);
        match engine.pre_execute(&action, &operator, Some(&terminal)) {
            PreDecision::Rejected { reason, approval } => {
                assert_eq!(approval.state, state);
                if state == ApprovalState::Rejected {
                    assert!(reason.contains("risky"));
                }
            },
            other => panic!("unexpected decision for {state}: {other:?}"),
        }
    }
}

#[test]
fn proceed_hands_the_executor_a_sanitized_payload() {
    let (engine, _bus) = engine();
    let mut action = request(ActionKind::QueryStatus);
    action.payload = json!({
        "__proto__": {"polluted": true},
        "query": "uptime"
    });

    match engine.pre_execute(&action, &agent(ClearanceLevel::L0), None) {
        PreDecision::Proceed {
            sanitized_payload, ..
        } => assert_eq!(sanitized_payload, json!({"query": "uptime"})),
        other => panic!("unexpected decision: {other:?}"),
    }
    // The original request is untouched.
    assert!(action.payload.get("__proto__").is_some());
}

#[test]
fn post_execute_reports_cleanup_on_failure_only() {
    let (engine, bus) = engine();
    let executed = capture(&bus, EventKind::ActionExecuted);
    let failed = capture(&bus, EventKind::ActionFailed);
    let worker = agent(ClearanceLevel::L0);

    let ok = engine.post_execute(&request(ActionKind::QueryStatus), &worker, None);
    assert!(ok.cleanup_actions.is_empty());

    let bad = engine.post_execute(
        &request(ActionKind::QueryStatus),
        &worker,
        Some("disk full"),
    );
    assert_eq!(
        bad.cleanup_actions,
        vec![
            CleanupAction::RollbackPendingChanges,
            CleanupAction::ReleaseResources,
        ]
    );
    assert_eq!(CleanupAction::RollbackPendingChanges.as_str(), "ROLLBACK_PENDING_CHANGES");

    assert_eq!(executed.lock().unwrap().len(), 1);
    let failures = failed.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        GovernanceEvent::ActionFailed { error, .. } if error == "disk full"
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn clearance_arithmetic_is_rank_comparison(
        kind_idx in 0_usize..ActionKind::ALL.len(),
        rank in 0_u8..3,
    ) {
        let (engine, _bus) = engine();
        let kind = ActionKind::ALL[kind_idx];
        let clearance = match rank {
            0 => ClearanceLevel::L0,
            1 => ClearanceLevel::L1,
            _ => ClearanceLevel::L2,
        };
        let verdict = engine.validate(&request(kind), &agent(clearance));
        prop_assert_eq!(
            verdict.allowed,
            clearance.rank() >= kind.required_clearance().rank()
        );
        prop_assert_eq!(
            verdict.requires_approval,
            verdict.allowed && kind.required_clearance() == ClearanceLevel::L2
        );
    }
}

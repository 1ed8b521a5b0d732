use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use super::*;
use crate::action::ActionKind;
use crate::clearance::ClearanceLevel;
use crate::config::GovernanceConfig;
use crate::events::EventKind;
use crate::identity::{AgentIdentity, ApproverIdentity};
use crate::time::VirtualClock;

fn control() -> Arc<MissionControl> {
    let clock = Arc::new(VirtualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
    ));
    Arc::new(MissionControl::with_clock(
        GovernanceConfig::default(),
        clock,
    ))
}

fn reader() -> AgentIdentity {
    AgentIdentity::new("agent-r", "reader", ClearanceLevel::L0, "sess-1")
}

#[test]
fn context_is_visible_while_the_executor_runs() {
    let control = control();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let control_in_executor = Arc::clone(&control);
    let seen_in_executor = Arc::clone(&seen);
    let outcome = control
        .execute(ActionKind::QueryStatus, &reader(), json!({}), move |_| {
            let contexts = control_in_executor.active_contexts();
            seen_in_executor.lock().unwrap().extend(contexts);
            Ok(json!({}))
        })
        .unwrap();

    let observed = seen.lock().unwrap();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].kind, ActionKind::QueryStatus);
    assert_eq!(observed[0].agent_id, "agent-r");
    match outcome {
        ExecutionOutcome::Completed { entry, .. } => {
            assert_eq!(observed[0].action_id, entry.action.id);
        },
        ExecutionOutcome::Pending(_) => panic!("L0 must not suspend"),
    }

    // Deregistered after completion.
    assert!(control.active_contexts().is_empty());
}

#[test]
fn context_is_removed_after_a_failed_executor() {
    let control = control();
    let err = control
        .execute(ActionKind::QueryStatus, &reader(), json!({}), |_| {
            Err("kaput".into())
        })
        .unwrap_err();
    assert_eq!(err.code(), "EXECUTION_FAILED");
    assert!(control.active_contexts().is_empty());
}

#[test]
fn handlers_registered_on_control_observe_every_subcomponent() {
    let control = control();
    let count = Arc::new(AtomicUsize::new(0));

    // Enforcement-side event.
    let violations = Arc::clone(&count);
    control.on_event(EventKind::ClearanceViolation, move |_| {
        violations.fetch_add(1, Ordering::SeqCst);
    });
    // Workflow-side event.
    let requested = Arc::clone(&count);
    control.on_event(EventKind::ActionRequested, move |_| {
        requested.fetch_add(1, Ordering::SeqCst);
    });
    // Trail-side event.
    let tampered = Arc::clone(&count);
    control.on_event(EventKind::AuditTamperDetected, move |_| {
        tampered.fetch_add(1, Ordering::SeqCst);
    });

    let low = reader();
    let _ = control.execute(ActionKind::ModifyConfig, &low, json!({}), |_| Ok(json!({})));

    control
        .register_approver(ApproverIdentity::new("ap-1", "Alice"))
        .unwrap();
    let operator = AgentIdentity::new("agent-o", "operator", ClearanceLevel::L2, "sess-2");
    let _ = control.execute(ActionKind::DestroyResource, &operator, json!({}), |_| {
        Ok(json!({}))
    });

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrent_executions_keep_the_chain_dense() {
    let control = Arc::new(MissionControl::new(GovernanceConfig::default()));
    std::thread::scope(|scope| {
        for worker in 0..8 {
            let control = Arc::clone(&control);
            scope.spawn(move || {
                let agent = AgentIdentity::new(
                    format!("agent-{worker}"),
                    "reader",
                    ClearanceLevel::L0,
                    "sess",
                );
                for _ in 0..10 {
                    control
                        .execute(ActionKind::QueryStatus, &agent, json!({}), |_| Ok(json!({})))
                        .unwrap();
                }
            });
        }
    });

    let entries = control.audit_trail().all();
    assert_eq!(entries.len(), 80);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.sequence, i as u64 + 1);
    }
    assert!(control.verify_audit_integrity());
}

#[test]
fn approved_request_survives_repeat_executions_until_revoked() {
    let control = control();
    control
        .register_approver(ApproverIdentity::new("ap-1", "Alice"))
        .unwrap();
    let operator = AgentIdentity::new("agent-o", "operator", ClearanceLevel::L2, "sess-2");

    let pending = match control
        .execute(ActionKind::DestroyResource, &operator, json!({}), |_| {
            unreachable!("executor must not run while pending")
        })
        .unwrap()
    {
        ExecutionOutcome::Pending(pending) => pending,
        ExecutionOutcome::Completed { .. } => panic!("first L2 call must suspend"),
    };
    control
        .approve_action(pending.approval_id, "ap-1", None, None)
        .unwrap();

    for _ in 0..2 {
        let outcome = control
            .execute(ActionKind::DestroyResource, &operator, json!({}), |_| {
                Ok(json!({"destroyed": true}))
            })
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    }

    control
        .revoke_approval(pending.approval_id, "sec-team", "postmortem finding")
        .unwrap();
    let err = control
        .execute(ActionKind::DestroyResource, &operator, json!({}), |_| {
            Ok(json!({}))
        })
        .unwrap_err();
    assert_eq!(err.code(), "ENFORCEMENT_REJECTED");
    assert!(err.to_string().contains("postmortem finding"));
}

#[test]
fn unregister_approver_reports_membership() {
    let control = control();
    control
        .register_approver(ApproverIdentity::new("ap-1", "Alice"))
        .unwrap();
    assert!(control.unregister_approver("ap-1"));
    assert!(!control.unregister_approver("ap-1"));
}

//! The enforcement engine implementation.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use super::sanitize::sanitize_payload;
use super::{CleanupAction, EnforcementVerdict, PostOutcome, PreDecision};
use crate::action::ActionRequest;
use crate::approval::{ApprovalRequest, ApprovalState};
use crate::events::{EventBus, GovernanceEvent};
use crate::identity::AgentIdentity;

/// Clearance check, idempotency guard, and pre/post execution hooks.
///
/// The engine is deliberately stateless about approvals: the caller
/// passes the current approval snapshot into
/// [`EnforcementEngine::pre_execute`]. Its only interior state is the
/// set of already-executed request ids.
pub struct EnforcementEngine {
    bus: EventBus,
    executed: Mutex<HashSet<Uuid>>,
}

impl EnforcementEngine {
    /// Creates an engine reporting through `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            executed: Mutex::new(HashSet::new()),
        }
    }

    /// Pure clearance decision for a request.
    ///
    /// Never touches the idempotency set and never emits events, so it
    /// is safe to call speculatively.
    #[must_use]
    pub fn validate(&self, action: &ActionRequest, agent: &AgentIdentity) -> EnforcementVerdict {
        let required = action.kind.required_clearance();
        let actual = agent.clearance;
        let allowed = actual.satisfies(required);
        EnforcementVerdict {
            required,
            actual,
            allowed,
            requires_approval: allowed && required == crate::clearance::ClearanceLevel::L2,
            reason: (!allowed).then(|| {
                format!("Insufficient clearance: required {required}, actual {actual}")
            }),
        }
    }

    /// Full pre-execution gate.
    ///
    /// Checks, in order: clearance arithmetic (emitting a critical
    /// `clearance-violation` event on failure), the idempotency set,
    /// and — for high-risk actions — the state of the supplied approval
    /// snapshot. On fallthrough the payload is sanitized and returned
    /// for the executor.
    #[must_use]
    pub fn pre_execute(
        &self,
        action: &ActionRequest,
        agent: &AgentIdentity,
        approval: Option<&ApprovalRequest>,
    ) -> PreDecision {
        let verdict = self.validate(action, agent);
        if !verdict.allowed {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "Insufficient clearance".to_string());
            tracing::warn!(
                action_id = %action.id,
                kind = %action.kind,
                agent_id = %agent.id,
                required = %verdict.required,
                actual = %verdict.actual,
                "clearance violation"
            );
            self.bus.emit(&GovernanceEvent::ClearanceViolation {
                action_id: action.id,
                kind: action.kind,
                agent_id: agent.id.clone(),
                required: verdict.required,
                actual: verdict.actual,
            });
            return PreDecision::ClearanceViolation {
                required: verdict.required,
                actual: verdict.actual,
                reason,
            };
        }

        if self
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&action.id)
        {
            return PreDecision::AlreadyExecuted;
        }

        if verdict.requires_approval {
            return match approval {
                None => PreDecision::ApprovalRequired,
                Some(approval) => match approval.state {
                    ApprovalState::Pending => PreDecision::AwaitingApproval {
                        approval: approval.clone(),
                    },
                    ApprovalState::Approved => PreDecision::Proceed {
                        sanitized_payload: sanitize_payload(&action.payload),
                        approval: Some(approval.clone()),
                    },
                    ApprovalState::Rejected => PreDecision::Rejected {
                        reason: match &approval.rejection_reason {
                            Some(why) => format!("Approval {} rejected: {why}", approval.id),
                            None => format!("Approval {} rejected", approval.id),
                        },
                        approval: approval.clone(),
                    },
                    ApprovalState::Expired => PreDecision::Rejected {
                        reason: format!("Approval {} expired before a decision", approval.id),
                        approval: approval.clone(),
                    },
                    ApprovalState::Revoked => PreDecision::Rejected {
                        reason: match &approval.rejection_reason {
                            Some(why) => format!("Approval {} revoked: {why}", approval.id),
                            None => format!("Approval {} revoked", approval.id),
                        },
                        approval: approval.clone(),
                    },
                },
            };
        }

        PreDecision::Proceed {
            sanitized_payload: sanitize_payload(&action.payload),
            approval: None,
        }
    }

    /// Post-execution hook.
    ///
    /// Marks the request id executed (success or failure), emits
    /// `action-executed` or `action-failed`, and reports compensating
    /// steps on failure.
    pub fn post_execute(
        &self,
        action: &ActionRequest,
        agent: &AgentIdentity,
        error: Option<&str>,
    ) -> PostOutcome {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action.id);

        match error {
            None => {
                self.bus.emit(&GovernanceEvent::ActionExecuted {
                    action_id: action.id,
                    kind: action.kind,
                    agent_id: agent.id.clone(),
                });
                PostOutcome::default()
            },
            Some(error) => {
                tracing::warn!(
                    action_id = %action.id,
                    kind = %action.kind,
                    error,
                    "executor failed"
                );
                self.bus.emit(&GovernanceEvent::ActionFailed {
                    action_id: action.id,
                    kind: action.kind,
                    agent_id: agent.id.clone(),
                    error: error.to_string(),
                });
                PostOutcome {
                    cleanup_actions: vec![
                        CleanupAction::RollbackPendingChanges,
                        CleanupAction::ReleaseResources,
                    ],
                }
            },
        }
    }

    /// Number of request ids recorded as executed.
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for EnforcementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcementEngine")
            .field("executed", &self.executed_count())
            .finish_non_exhaustive()
    }
}

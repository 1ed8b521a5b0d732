//! Mission Control: the orchestrator tying enforcement, approval, and
//! audit together behind one entry point.
//!
//! One [`MissionControl::execute`] call runs the full governance
//! sequence: pre-execution enforcement, the caller-supplied executor,
//! post-execution bookkeeping, and exactly one audit append. High-risk
//! actions short-circuit into the approval workflow; the caller
//! re-invokes `execute` after the request is approved — the orchestrator
//! never re-drives a suspended executor itself.
//!
//! No component lock is held across the executor invocation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::action::{ActionKind, ActionRequest, ActionResult};
use crate::approval::{ApprovalRequest, ApprovalWorkflow};
use crate::audit::{AuditEntry, AuditTrail};
use crate::config::GovernanceConfig;
use crate::enforcement::{EnforcementEngine, PreDecision};
use crate::error::GovernanceError;
use crate::events::{EventBus, EventKind, EventSubscription, GovernanceEvent};
use crate::identity::{AgentIdentity, ApproverIdentity};
use crate::time::{Clock, SystemClock, truncate_millis, ts_millis};

#[cfg(test)]
mod tests;

/// Error type the caller-supplied executor may return.
pub type ExecutorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reference handed back when an action is waiting on human approval.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    /// The approval request to decide.
    pub approval_id: Uuid,
    /// The action attempt that created (or found) it.
    pub action_id: Uuid,
    /// Absolute deadline of the approval request.
    #[serde(with = "ts_millis")]
    pub expires_at: DateTime<Utc>,
}

/// Successful or suspended outcome of [`MissionControl::execute`].
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The executor ran; the action is recorded.
    Completed {
        /// The executor's result.
        result: ActionResult,
        /// The appended audit entry.
        entry: AuditEntry,
    },
    /// The action needs human approval; the executor was not invoked.
    Pending(PendingApproval),
}

impl ExecutionOutcome {
    /// The pending reference, when the action is suspended on approval.
    #[must_use]
    pub const fn pending(&self) -> Option<&PendingApproval> {
        match self {
            Self::Pending(pending) => Some(pending),
            Self::Completed { .. } => None,
        }
    }
}

/// Snapshot of one in-flight execution, for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// The executing action request.
    pub action_id: Uuid,
    /// Its kind.
    pub kind: ActionKind,
    /// The requesting agent.
    pub agent_id: String,
    /// When the executor was entered.
    #[serde(with = "ts_millis")]
    pub started_at: DateTime<Utc>,
}

/// The governance orchestrator.
///
/// Owns the audit trail, the enforcement engine, and the approval
/// workflow for its lifetime; all three report through one shared event
/// bus, so a handler registered with [`MissionControl::on_event`]
/// observes every subcomponent. Every public method is safe to call from
/// arbitrary threads.
pub struct MissionControl {
    config: GovernanceConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    audit: AuditTrail,
    enforcement: EnforcementEngine,
    workflow: ApprovalWorkflow,
    contexts: Mutex<HashMap<Uuid, ExecutionContext>>,
}

impl MissionControl {
    /// Creates an orchestrator on the system clock.
    #[must_use]
    pub fn new(config: GovernanceConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates an orchestrator on an injected clock. Test harnesses
    /// pass a virtual clock to drive timers deterministically.
    #[must_use]
    pub fn with_clock(config: GovernanceConfig, clock: Arc<dyn Clock>) -> Self {
        let bus = EventBus::new();
        let audit = AuditTrail::new(config.clone(), Arc::clone(&clock), bus.clone());
        let enforcement = EnforcementEngine::new(bus.clone());
        let workflow = ApprovalWorkflow::new(config.clone(), Arc::clone(&clock), bus.clone());
        Self {
            config,
            clock,
            bus,
            audit,
            enforcement,
            workflow,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration this instance was built with.
    #[must_use]
    pub const fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Registers a human approver.
    ///
    /// # Errors
    ///
    /// Fails with `INSUFFICIENT_APPROVER_CLEARANCE` unless the approver
    /// holds L2.
    pub fn register_approver(&self, approver: ApproverIdentity) -> Result<(), GovernanceError> {
        Ok(self.workflow.register(approver)?)
    }

    /// Removes an approver; returns whether one was registered.
    pub fn unregister_approver(&self, approver_id: &str) -> bool {
        self.workflow.unregister(approver_id)
    }

    /// Runs one governed action attempt.
    ///
    /// The sequence is: mint an immutable [`ActionRequest`], consult the
    /// approval workflow for an existing request, run the enforcement
    /// gate, then either invoke `executor` with the sanitized payload or
    /// short-circuit. Exactly one audit entry is appended for every
    /// outcome except a pending approval (no entry) and the idempotency
    /// guard (no entry).
    ///
    /// # Errors
    ///
    /// - [`GovernanceError::ClearanceViolation`] with the failed entry.
    /// - [`GovernanceError::EnforcementRejected`] when the action's
    ///   approval was rejected, expired, or revoked.
    /// - [`GovernanceError::AlreadyExecuted`] from the idempotency
    ///   guard.
    /// - [`GovernanceError::ExecutionFailed`] when the executor errors.
    /// - [`GovernanceError::Approval`] when submission finds no
    ///   registered approvers.
    pub fn execute<F>(
        &self,
        kind: ActionKind,
        agent: &AgentIdentity,
        payload: Value,
        executor: F,
    ) -> Result<ExecutionOutcome, GovernanceError>
    where
        F: FnOnce(&Value) -> Result<Value, ExecutorError>,
    {
        let now = truncate_millis(self.clock.now());
        let action = ActionRequest::new(kind, agent.id.clone(), now, payload);
        let approval = self.workflow.current_for(kind, &agent.id);

        match self.enforcement.pre_execute(&action, agent, approval.as_ref()) {
            PreDecision::Proceed {
                sanitized_payload,
                approval,
            } => self.run_executor(&action, agent, &sanitized_payload, approval, executor),
            PreDecision::ApprovalRequired => {
                let approval = self.workflow.submit_for_approval(&action, agent)?;
                Ok(ExecutionOutcome::Pending(PendingApproval {
                    approval_id: approval.id,
                    action_id: action.id,
                    expires_at: approval.expires_at,
                }))
            },
            PreDecision::AwaitingApproval { approval } => {
                Ok(ExecutionOutcome::Pending(PendingApproval {
                    approval_id: approval.id,
                    action_id: action.id,
                    expires_at: approval.expires_at,
                }))
            },
            PreDecision::Rejected { reason, approval } => {
                let result =
                    ActionResult::failure(action.id, truncate_millis(self.clock.now()), reason.as_str());
                let entry = self.audit.record(&action, &result, agent, Some(&approval))?;
                Err(GovernanceError::EnforcementRejected {
                    reason,
                    entry: Box::new(entry),
                })
            },
            PreDecision::ClearanceViolation {
                required,
                actual,
                reason,
            } => {
                let result =
                    ActionResult::failure(action.id, truncate_millis(self.clock.now()), reason.as_str());
                let entry = self.audit.record(&action, &result, agent, None)?;
                Err(GovernanceError::ClearanceViolation {
                    kind,
                    required,
                    actual,
                    entry: Box::new(entry),
                })
            },
            PreDecision::AlreadyExecuted => Err(GovernanceError::AlreadyExecuted {
                action_id: action.id,
            }),
        }
    }

    /// Delegates an affirmative decision to the approval workflow.
    ///
    /// # Errors
    ///
    /// Surfaces the workflow's guard ladder: `NOT_FOUND`,
    /// `ALREADY_DECIDED`, `UNAUTHORIZED`, `UNREGISTERED`,
    /// `DUPLICATE_DECISION`.
    pub fn approve_action(
        &self,
        approval_id: Uuid,
        approver_id: &str,
        signature: Option<Vec<u8>>,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, GovernanceError> {
        Ok(self
            .workflow
            .approve(approval_id, approver_id, signature, reason)?)
    }

    /// Delegates a rejection to the approval workflow. A single
    /// rejection settles the request.
    ///
    /// # Errors
    ///
    /// Same guard ladder as [`MissionControl::approve_action`].
    pub fn reject_action(
        &self,
        approval_id: Uuid,
        approver_id: &str,
        reason: impl Into<String>,
        signature: Option<Vec<u8>>,
    ) -> Result<ApprovalRequest, GovernanceError> {
        Ok(self
            .workflow
            .reject(approval_id, approver_id, signature, Some(reason.into()))?)
    }

    /// Revokes an approved request; the emergency-override path for a
    /// single approval.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND` for an unknown id, `INVALID_TRANSITION` unless the
    /// request is `approved`.
    pub fn revoke_approval(
        &self,
        approval_id: Uuid,
        revoked_by: &str,
        reason: impl Into<String>,
    ) -> Result<ApprovalRequest, GovernanceError> {
        Ok(self.workflow.revoke(approval_id, revoked_by, reason)?)
    }

    /// Revokes every pending approval in one step and emits one
    /// composite critical `action-rejected` event carrying the count.
    ///
    /// In-flight executors are not cancelled; the stop makes subsequent
    /// retries fail instead.
    pub fn emergency_stop(&self, reason: &str) {
        let revoked_approvals = self.workflow.revoke_all_pending(reason);
        tracing::warn!(revoked_approvals, reason, "emergency stop");
        self.bus.emit(&GovernanceEvent::EmergencyStop {
            revoked_approvals,
            reason: reason.to_string(),
        });
    }

    /// Every approval request still pending.
    #[must_use]
    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.workflow.pending()
    }

    /// The approval workflow, for decision history and registry
    /// inspection.
    #[must_use]
    pub const fn approval_workflow(&self) -> &ApprovalWorkflow {
        &self.workflow
    }

    /// The audit trail handle.
    #[must_use]
    pub const fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }

    /// Walks the audit chain; see [`AuditTrail::verify_chain`].
    #[must_use]
    pub fn verify_audit_integrity(&self) -> bool {
        self.audit.verify_chain()
    }

    /// Serializes the compliance artifact; see
    /// [`AuditTrail::export_json`].
    ///
    /// # Errors
    ///
    /// Surfaces `AUDIT_SERIALIZATION` if the artifact fails to encode.
    pub fn export_audit_trail(&self) -> Result<String, GovernanceError> {
        Ok(self.audit.export_json()?)
    }

    /// Registers an event handler; see [`EventBus::subscribe`]. The
    /// subscription observes all three subcomponents.
    pub fn on_event<F>(&self, kind: EventKind, handler: F) -> EventSubscription
    where
        F: Fn(&GovernanceEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, handler)
    }

    /// Snapshot of in-flight execution contexts.
    #[must_use]
    pub fn active_contexts(&self) -> Vec<ExecutionContext> {
        let mut contexts: Vec<ExecutionContext> = self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        contexts.sort_by_key(|ctx| ctx.started_at);
        contexts
    }

    fn run_executor<F>(
        &self,
        action: &ActionRequest,
        agent: &AgentIdentity,
        sanitized_payload: &Value,
        approval: Option<ApprovalRequest>,
        executor: F,
    ) -> Result<ExecutionOutcome, GovernanceError>
    where
        F: FnOnce(&Value) -> Result<Value, ExecutorError>,
    {
        {
            let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
            contexts.insert(
                action.id,
                ExecutionContext {
                    action_id: action.id,
                    kind: action.kind,
                    agent_id: agent.id.clone(),
                    started_at: truncate_millis(self.clock.now()),
                },
            );
        }

        // No component lock may be held across user code.
        let executed = executor(sanitized_payload);

        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&action.id);

        match executed {
            Ok(output) => {
                self.enforcement.post_execute(action, agent, None);
                let mut result = ActionResult::success(
                    action.id,
                    truncate_millis(self.clock.now()),
                    Some(output),
                );
                result.executed_by = Some(agent.id.clone());
                let entry = self.audit.record(action, &result, agent, approval.as_ref())?;
                Ok(ExecutionOutcome::Completed { result, entry })
            },
            Err(error) => {
                let message = error.to_string();
                let post = self.enforcement.post_execute(action, agent, Some(&message));
                tracing::debug!(
                    action_id = %action.id,
                    cleanup = post.cleanup_actions.len(),
                    "cleanup actions reported after failed execution"
                );
                let mut result = ActionResult::failure(
                    action.id,
                    truncate_millis(self.clock.now()),
                    message.as_str(),
                );
                result.executed_by = Some(agent.id.clone());
                let entry = self.audit.record(action, &result, agent, approval.as_ref())?;
                Err(GovernanceError::ExecutionFailed {
                    message,
                    entry: Box::new(entry),
                })
            },
        }
    }
}

impl std::fmt::Debug for MissionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MissionControl")
            .field("audit_entries", &self.audit.len())
            .field("pending_contexts", &self.active_contexts().len())
            .finish_non_exhaustive()
    }
}

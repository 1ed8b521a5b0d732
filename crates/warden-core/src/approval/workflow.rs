//! Approval workflow: registry, state machine, thresholds, timers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ApprovalDecision, ApprovalError, ApprovalRequest, ApprovalState, DecisionKind};
use crate::action::{ActionKind, ActionRequest};
use crate::clearance::ClearanceLevel;
use crate::config::GovernanceConfig;
use crate::events::{EventBus, GovernanceEvent};
use crate::hash::{CanonicalBytes, HashAlgorithm};
use crate::identity::{AgentIdentity, ApproverIdentity};
use crate::time::{Clock, TimerGuard, add_millis, iso_millis, truncate_millis};

/// Domain separator for evidence hashes.
const EVIDENCE_DOMAIN: &[u8] = b"warden.approval.evidence.v1\0";

struct ApprovalRecord {
    request: ApprovalRequest,
    decisions: Vec<ApprovalDecision>,
    expiry_timer: Option<TimerGuard>,
    escalation_timer: Option<TimerGuard>,
}

impl ApprovalRecord {
    fn cancel_timers(&mut self) {
        if let Some(timer) = self.expiry_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.escalation_timer.take() {
            timer.cancel();
        }
    }
}

struct WorkflowInner {
    /// Registry in insertion order; approver selection is first-N.
    approvers: Vec<ApproverIdentity>,
    records: HashMap<Uuid, ApprovalRecord>,
    /// Latest approval per (kind, agent), consulted on retries.
    by_request: HashMap<(ActionKind, String), Uuid>,
}

/// State machine over human approval decisions.
///
/// All methods are safe to call from arbitrary threads; interior state
/// is guarded by a single mutex, and no lock is held while events are
/// delivered to subscribers.
pub struct ApprovalWorkflow {
    config: GovernanceConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    inner: Arc<Mutex<WorkflowInner>>,
}

impl ApprovalWorkflow {
    /// Creates a workflow with an empty approver registry.
    #[must_use]
    pub fn new(config: GovernanceConfig, clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        Self {
            config,
            clock,
            bus,
            inner: Arc::new(Mutex::new(WorkflowInner {
                approvers: Vec::new(),
                records: HashMap::new(),
                by_request: HashMap::new(),
            })),
        }
    }

    // =========================================================================
    // Approver registry
    // =========================================================================

    /// Registers an approver.
    ///
    /// Re-registering an existing id updates it in place, keeping its
    /// position in the selection order.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::InsufficientApproverClearance`] unless the
    /// approver holds L2.
    pub fn register(&self, approver: ApproverIdentity) -> Result<(), ApprovalError> {
        if approver.clearance != ClearanceLevel::L2 {
            return Err(ApprovalError::InsufficientApproverClearance {
                approver_id: approver.id,
                clearance: approver.clearance,
            });
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.approvers.iter_mut().find(|a| a.id == approver.id) {
            Some(existing) => *existing = approver,
            None => inner.approvers.push(approver),
        }
        Ok(())
    }

    /// Removes an approver; returns whether one was registered.
    ///
    /// Requests that already chose the approver keep it in their set;
    /// its later decisions fail with [`ApprovalError::Unregistered`].
    pub fn unregister(&self, approver_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.approvers.len();
        inner.approvers.retain(|a| a.id != approver_id);
        inner.approvers.len() != before
    }

    /// Snapshot of the registry, in insertion order.
    #[must_use]
    pub fn approvers(&self) -> Vec<ApproverIdentity> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .approvers
            .clone()
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Creates a pending approval request for an action attempt.
    ///
    /// Chooses the first `min(required_approvers, registry size)`
    /// approvers (capped by `max_approvers`) in registry insertion
    /// order, binds the evidence hash, schedules the escalation warning
    /// and the absolute deadline on the shared clock, and emits
    /// `action-requested`.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NoApproversRegistered`] when the registry is
    /// empty.
    pub fn submit_for_approval(
        &self,
        action: &ActionRequest,
        requester: &AgentIdentity,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let now = truncate_millis(self.clock.now());
        let request = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.approvers.is_empty() {
                return Err(ApprovalError::NoApproversRegistered);
            }

            let chosen = self
                .config
                .required_approvers
                .max(1)
                .min(inner.approvers.len())
                .min(self.config.max_approvers.max(1));
            let approver_ids: Vec<String> = inner
                .approvers
                .iter()
                .take(chosen)
                .map(|a| a.id.clone())
                .collect();

            let approval_id = Uuid::new_v4();
            let expires_at = add_millis(now, self.config.l2_approval_timeout_ms);
            let request = ApprovalRequest {
                id: approval_id,
                action_id: action.id,
                action_kind: action.kind,
                state: ApprovalState::Pending,
                requester: requester.clone(),
                created_at: now,
                approver_ids,
                decided_by: None,
                decided_at: None,
                rejection_reason: None,
                expires_at,
                evidence_hash: evidence_hash(self.config.hash_algorithm, action, &now),
            };

            inner.records.insert(
                approval_id,
                ApprovalRecord {
                    request: request.clone(),
                    decisions: Vec::new(),
                    expiry_timer: None,
                    escalation_timer: None,
                },
            );
            inner
                .by_request
                .insert((action.kind, action.agent_id.clone()), approval_id);

            let expiry_timer = self.schedule_expiry(approval_id, action.id);
            let escalation_timer = self.schedule_escalation(approval_id, action.id);
            let record = inner
                .records
                .get_mut(&approval_id)
                .expect("record inserted above");
            record.expiry_timer = Some(expiry_timer);
            record.escalation_timer = Some(escalation_timer);

            request
        };

        tracing::info!(
            approval_id = %request.id,
            action_id = %request.action_id,
            kind = %request.action_kind,
            approvers = request.approver_ids.len(),
            "approval request submitted"
        );
        self.bus.emit(&GovernanceEvent::ActionRequested {
            approval: request.clone(),
        });
        Ok(request)
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    /// Records an affirmative decision and re-evaluates the threshold.
    ///
    /// The request moves to `approved` when affirmative decisions reach
    /// the threshold, or, under `require_unanimous`, when every chosen
    /// approver has approved.
    ///
    /// # Errors
    ///
    /// In guard order: [`ApprovalError::NotFound`],
    /// [`ApprovalError::AlreadyDecided`], [`ApprovalError::Unauthorized`],
    /// [`ApprovalError::Unregistered`],
    /// [`ApprovalError::DuplicateDecision`].
    pub fn approve(
        &self,
        approval_id: Uuid,
        approver_id: &str,
        signature: Option<Vec<u8>>,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let now = truncate_millis(self.clock.now());
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            self.decide_locked(
                &mut inner,
                &mut events,
                approval_id,
                approver_id,
                DecisionKind::Approve,
                signature,
                reason,
                now,
            )
        };
        self.emit_all(&events);
        result
    }

    /// Records a rejection. A single rejection settles the request.
    ///
    /// # Errors
    ///
    /// Same guard ladder as [`ApprovalWorkflow::approve`].
    pub fn reject(
        &self,
        approval_id: Uuid,
        approver_id: &str,
        signature: Option<Vec<u8>>,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let now = truncate_millis(self.clock.now());
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            self.decide_locked(
                &mut inner,
                &mut events,
                approval_id,
                approver_id,
                DecisionKind::Reject,
                signature,
                reason,
                now,
            )
        };
        self.emit_all(&events);
        result
    }

    /// Revokes an approved request. This is the emergency-override path
    /// for approvals that turned out to be wrong; it emits
    /// `action-rejected` at critical severity.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::NotFound`] for an unknown id;
    /// [`ApprovalError::InvalidTransition`] unless the request is
    /// `approved`.
    pub fn revoke(
        &self,
        approval_id: Uuid,
        revoked_by: &str,
        reason: impl Into<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let now = truncate_millis(self.clock.now());
        let reason = reason.into();
        let request = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let record = inner
                .records
                .get_mut(&approval_id)
                .ok_or(ApprovalError::NotFound { approval_id })?;
            if record.request.state != ApprovalState::Approved {
                return Err(ApprovalError::InvalidTransition {
                    approval_id,
                    from: record.request.state,
                });
            }
            record.request.state = ApprovalState::Revoked;
            record.request.rejection_reason = Some(reason.clone());
            record.request.decided_by = Some(revoked_by.to_string());
            record.request.decided_at = Some(now);
            record.cancel_timers();
            record.request.clone()
        };
        tracing::warn!(%approval_id, revoked_by, "approved request revoked");
        self.bus.emit(&GovernanceEvent::ActionRejected {
            approval_id,
            action_id: request.action_id,
            reason: Some(reason),
            revoked: true,
        });
        Ok(request)
    }

    /// Privileged revocation of every still-pending request, used only
    /// by the orchestrator's emergency stop. Bypasses the
    /// approved-only guard; emits no per-request events (the
    /// orchestrator emits one composite event instead).
    pub(crate) fn revoke_all_pending(&self, reason: &str) -> usize {
        let now = truncate_millis(self.clock.now());
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut revoked = 0;
        for record in inner.records.values_mut() {
            if record.request.state == ApprovalState::Pending {
                record.request.state = ApprovalState::Revoked;
                record.request.rejection_reason = Some(reason.to_string());
                record.request.decided_at = Some(now);
                record.cancel_timers();
                revoked += 1;
            }
        }
        revoked
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns the approval request with the given id.
    #[must_use]
    pub fn get(&self, approval_id: Uuid) -> Option<ApprovalRequest> {
        let mut events = Vec::new();
        let request = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let now = truncate_millis(self.clock.now());
            self.expire_overdue_locked(&mut inner, &mut events, now);
            inner.records.get(&approval_id).map(|r| r.request.clone())
        };
        self.emit_all(&events);
        request
    }

    /// Every request still in `pending`.
    #[must_use]
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut events = Vec::new();
        let pending = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let now = truncate_millis(self.clock.now());
            self.expire_overdue_locked(&mut inner, &mut events, now);
            let mut pending: Vec<ApprovalRequest> = inner
                .records
                .values()
                .filter(|r| r.request.state == ApprovalState::Pending)
                .map(|r| r.request.clone())
                .collect();
            pending.sort_by_key(|r| r.created_at);
            pending
        };
        self.emit_all(&events);
        pending
    }

    /// The latest approval request for a (kind, agent) pair, with
    /// overdue pendings expired first.
    ///
    /// Retried `execute` calls consult this to find the approval their
    /// first attempt created.
    #[must_use]
    pub fn current_for(&self, kind: ActionKind, agent_id: &str) -> Option<ApprovalRequest> {
        let mut events = Vec::new();
        let request = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let now = truncate_millis(self.clock.now());
            self.expire_overdue_locked(&mut inner, &mut events, now);
            inner
                .by_request
                .get(&(kind, agent_id.to_string()))
                .and_then(|id| inner.records.get(id))
                .map(|r| r.request.clone())
        };
        self.emit_all(&events);
        request
    }

    /// Decisions recorded so far for a request.
    #[must_use]
    pub fn decisions(&self, approval_id: Uuid) -> Option<Vec<ApprovalDecision>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(&approval_id)
            .map(|r| r.decisions.clone())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    fn decide_locked(
        &self,
        inner: &mut WorkflowInner,
        events: &mut Vec<GovernanceEvent>,
        approval_id: Uuid,
        approver_id: &str,
        decision: DecisionKind,
        signature: Option<Vec<u8>>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let registered = inner.approvers.iter().any(|a| a.id == approver_id);
        let record = inner
            .records
            .get_mut(&approval_id)
            .ok_or(ApprovalError::NotFound { approval_id })?;

        if let Some(event) = Self::expire_record(record, now, self.config.auto_reject_on_timeout) {
            events.push(event);
        }
        if record.request.state != ApprovalState::Pending {
            return Err(ApprovalError::AlreadyDecided {
                approval_id,
                state: record.request.state,
            });
        }
        if !record
            .request
            .approver_ids
            .iter()
            .any(|id| id == approver_id)
        {
            return Err(ApprovalError::Unauthorized {
                approver_id: approver_id.to_string(),
            });
        }
        if !registered {
            return Err(ApprovalError::Unregistered {
                approver_id: approver_id.to_string(),
            });
        }
        if record.decisions.iter().any(|d| d.approver_id == approver_id) {
            return Err(ApprovalError::DuplicateDecision {
                approver_id: approver_id.to_string(),
            });
        }

        record.decisions.push(ApprovalDecision {
            approver_id: approver_id.to_string(),
            decision,
            decided_at: now,
            signature,
            reason: reason.clone(),
        });

        match decision {
            DecisionKind::Reject => {
                record.request.state = ApprovalState::Rejected;
                record.request.decided_by = Some(approver_id.to_string());
                record.request.decided_at = Some(now);
                record.request.rejection_reason = reason.clone();
                record.cancel_timers();
                events.push(GovernanceEvent::ActionRejected {
                    approval_id,
                    action_id: record.request.action_id,
                    reason,
                    revoked: false,
                });
            },
            DecisionKind::Approve => {
                let chosen = record.request.approver_ids.len();
                let affirmative = record
                    .decisions
                    .iter()
                    .filter(|d| d.decision == DecisionKind::Approve)
                    .count();
                let approved = if self.config.require_unanimous {
                    record.decisions.len() == chosen && affirmative == chosen
                } else {
                    affirmative >= self.config.required_approvers.max(1).min(chosen)
                };
                if approved {
                    record.request.state = ApprovalState::Approved;
                    record.request.decided_by = Some(approver_id.to_string());
                    record.request.decided_at = Some(now);
                    record.cancel_timers();
                    events.push(GovernanceEvent::ActionApproved {
                        approval: record.request.clone(),
                    });
                }
            },
        }

        Ok(record.request.clone())
    }

    /// Expires a pending record past its absolute deadline. Returns the
    /// timeout event exactly once per request; the scheduled timer
    /// finds a non-pending state afterwards and stays silent.
    fn expire_record(
        record: &mut ApprovalRecord,
        now: DateTime<Utc>,
        auto_reject: bool,
    ) -> Option<GovernanceEvent> {
        if !auto_reject
            || record.request.state != ApprovalState::Pending
            || now < record.request.expires_at
        {
            return None;
        }
        record.request.state = ApprovalState::Expired;
        record.cancel_timers();
        Some(GovernanceEvent::ApprovalTimeout {
            approval_id: record.request.id,
            action_id: record.request.action_id,
            escalation: false,
        })
    }

    fn expire_overdue_locked(
        &self,
        inner: &mut WorkflowInner,
        events: &mut Vec<GovernanceEvent>,
        now: DateTime<Utc>,
    ) {
        for record in inner.records.values_mut() {
            if let Some(event) =
                Self::expire_record(record, now, self.config.auto_reject_on_timeout)
            {
                events.push(event);
            }
        }
    }

    fn schedule_expiry(&self, approval_id: Uuid, action_id: Uuid) -> TimerGuard {
        let weak = Arc::downgrade(&self.inner);
        let bus = self.bus.clone();
        let auto_reject = self.config.auto_reject_on_timeout;
        self.clock.schedule(
            Duration::from_millis(self.config.l2_approval_timeout_ms),
            Box::new(move || {
                if let Some(event) =
                    timeout_fired(&weak, approval_id, action_id, auto_reject, false)
                {
                    tracing::warn!(%approval_id, "approval request hit its absolute deadline");
                    bus.emit(&event);
                }
            }),
        )
    }

    fn schedule_escalation(&self, approval_id: Uuid, action_id: Uuid) -> TimerGuard {
        let weak = Arc::downgrade(&self.inner);
        let bus = self.bus.clone();
        self.clock.schedule(
            Duration::from_millis(self.config.effective_escalation_ms()),
            Box::new(move || {
                if let Some(event) = timeout_fired(&weak, approval_id, action_id, false, true) {
                    tracing::warn!(%approval_id, "approval request escalated without a decision");
                    bus.emit(&event);
                }
            }),
        )
    }

    fn emit_all(&self, events: &[GovernanceEvent]) {
        for event in events {
            self.bus.emit(event);
        }
    }
}

impl std::fmt::Debug for ApprovalWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ApprovalWorkflow")
            .field("approvers", &inner.approvers.len())
            .field("records", &inner.records.len())
            .finish_non_exhaustive()
    }
}

/// Timer-side timeout handling: expires the request (absolute deadline
/// with auto-reject) or just reports (escalation warning). Returns the
/// event to emit, or `None` when the request already settled.
fn timeout_fired(
    weak: &Weak<Mutex<WorkflowInner>>,
    approval_id: Uuid,
    action_id: Uuid,
    transition_to_expired: bool,
    escalation: bool,
) -> Option<GovernanceEvent> {
    let inner = weak.upgrade()?;
    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
    let record = inner.records.get_mut(&approval_id)?;
    if record.request.state != ApprovalState::Pending {
        return None;
    }
    if transition_to_expired {
        record.request.state = ApprovalState::Expired;
        record.cancel_timers();
    }
    Some(GovernanceEvent::ApprovalTimeout {
        approval_id,
        action_id,
        escalation,
    })
}

/// Digest over the request's immutable identifying fields, bound at
/// submission: action id, action kind, agent id, submission timestamp,
/// and a digest of the payload.
fn evidence_hash(
    algorithm: HashAlgorithm,
    action: &ActionRequest,
    created_at: &DateTime<Utc>,
) -> String {
    let payload_json =
        serde_json::to_string(&action.payload).expect("JSON payload serialization must not fail");
    let payload_digest = algorithm.digest_hex(payload_json.as_bytes());
    let mut bytes = CanonicalBytes::with_domain(EVIDENCE_DOMAIN);
    bytes.push_uuid(&action.id);
    bytes.push_str(action.kind.as_str());
    bytes.push_str(&action.agent_id);
    bytes.push_str(&iso_millis(created_at));
    bytes.push_str(&payload_digest);
    algorithm.digest_hex(&bytes.finish())
}

//! Governance event taxonomy and fan-out.
//!
//! Every component reports through one [`EventBus`]: the enforcement
//! engine emits clearance violations and execution outcomes, the approval
//! workflow emits lifecycle transitions, and the audit trail emits tamper
//! detection. Collaborators (notifiers, persistence layers, dashboards)
//! subscribe per [`EventKind`] and receive events by copy.
//!
//! Severity is a property of the event, not the subscription: an
//! `action-rejected` emitted by a revocation is critical, the same kind
//! emitted by an ordinary rejection is a warning.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::action::ActionKind;
use crate::approval::ApprovalRequest;
use crate::audit::TamperReason;
use crate::clearance::ClearanceLevel;

mod bus;

#[cfg(test)]
mod tests;

pub use bus::{EventBus, EventHandler, EventSubscription};

/// Subscription key: the eight governance event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// An approval request was submitted for a high-risk action.
    ActionRequested,
    /// An approval request reached the `approved` state.
    ActionApproved,
    /// An approval was rejected or revoked, or an emergency stop ran.
    ActionRejected,
    /// An executor completed successfully.
    ActionExecuted,
    /// An executor failed.
    ActionFailed,
    /// An agent attempted an action above its clearance.
    ClearanceViolation,
    /// An approval hit its escalation warning or absolute deadline.
    ApprovalTimeout,
    /// Chain verification found a tampered audit entry.
    AuditTamperDetected,
}

impl EventKind {
    /// Canonical kebab-case name, matching the serde form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ActionRequested => "action-requested",
            Self::ActionApproved => "action-approved",
            Self::ActionRejected => "action-rejected",
            Self::ActionExecuted => "action-executed",
            Self::ActionFailed => "action-failed",
            Self::ClearanceViolation => "clearance-violation",
            Self::ApprovalTimeout => "approval-timeout",
            Self::AuditTamperDetected => "audit-tamper-detected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Normal lifecycle.
    Info,
    /// Needs operator attention eventually.
    Warning,
    /// Needs operator attention now.
    Critical,
}

/// A governance event, delivered to subscribers by reference and cloned
/// on demand.
///
/// Variants do not map one-to-one onto [`EventKind`]:
/// [`GovernanceEvent::EmergencyStop`] is the composite `action-rejected`
/// emitted once per emergency stop, carrying the revocation count.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum GovernanceEvent {
    /// A new approval request is awaiting a decision.
    ActionRequested {
        /// The pending approval request.
        approval: ApprovalRequest,
    },
    /// An approval request transitioned to `approved`.
    ActionApproved {
        /// The approved request.
        approval: ApprovalRequest,
    },
    /// An approval request was rejected or revoked.
    ActionRejected {
        /// Approval request id.
        approval_id: Uuid,
        /// Originating action request id.
        action_id: Uuid,
        /// Stated reason, when one was given.
        reason: Option<String>,
        /// True when this was a revocation of an approved request.
        revoked: bool,
    },
    /// Composite rejection from an emergency stop.
    EmergencyStop {
        /// How many pending approvals were revoked.
        revoked_approvals: usize,
        /// Operator-supplied reason.
        reason: String,
    },
    /// An executor completed.
    ActionExecuted {
        /// Action request id.
        action_id: Uuid,
        /// Action kind.
        kind: ActionKind,
        /// Requesting agent.
        agent_id: String,
    },
    /// An executor failed.
    ActionFailed {
        /// Action request id.
        action_id: Uuid,
        /// Action kind.
        kind: ActionKind,
        /// Requesting agent.
        agent_id: String,
        /// Error description.
        error: String,
    },
    /// Clearance arithmetic denied an action.
    ClearanceViolation {
        /// Action request id.
        action_id: Uuid,
        /// Action kind.
        kind: ActionKind,
        /// Requesting agent.
        agent_id: String,
        /// Clearance the action requires.
        required: ClearanceLevel,
        /// Clearance the agent holds.
        actual: ClearanceLevel,
    },
    /// An approval hit its escalation warning or absolute deadline.
    ApprovalTimeout {
        /// Approval request id.
        approval_id: Uuid,
        /// Originating action request id.
        action_id: Uuid,
        /// True for the escalation warning, false for the absolute
        /// deadline.
        escalation: bool,
    },
    /// Chain verification found a tampered entry.
    AuditTamperDetected {
        /// Sequence number of the first broken entry.
        sequence: u64,
        /// What failed to verify.
        reason: TamperReason,
    },
}

impl GovernanceEvent {
    /// The subscription kind this event is delivered under.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ActionRequested { .. } => EventKind::ActionRequested,
            Self::ActionApproved { .. } => EventKind::ActionApproved,
            Self::ActionRejected { .. } | Self::EmergencyStop { .. } => EventKind::ActionRejected,
            Self::ActionExecuted { .. } => EventKind::ActionExecuted,
            Self::ActionFailed { .. } => EventKind::ActionFailed,
            Self::ClearanceViolation { .. } => EventKind::ClearanceViolation,
            Self::ApprovalTimeout { .. } => EventKind::ApprovalTimeout,
            Self::AuditTamperDetected { .. } => EventKind::AuditTamperDetected,
        }
    }

    /// Fixed severity of this event.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::ActionRequested { .. }
            | Self::ActionApproved { .. }
            | Self::ActionExecuted { .. } => Severity::Info,
            Self::ActionFailed { .. } | Self::ApprovalTimeout { .. } => Severity::Warning,
            Self::ActionRejected { revoked, .. } => {
                if *revoked {
                    Severity::Critical
                } else {
                    Severity::Warning
                }
            },
            Self::EmergencyStop { .. }
            | Self::ClearanceViolation { .. }
            | Self::AuditTamperDetected { .. } => Severity::Critical,
        }
    }
}

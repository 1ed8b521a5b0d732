//! Human-in-the-loop approval workflow.
//!
//! Every L2 action attempt produces an [`ApprovalRequest`] that one or
//! more registered human approvers must decide before the action can
//! run. The request is a state machine:
//!
//! ```text
//!                approve (N >= threshold)
//! pending ──────────────────────────────→ approved ──revoke──→ revoked
//!   │
//!   ├── reject ─────────────────────────→ rejected
//!   │
//!   └── timeout (absolute deadline) ────→ expired
//! ```
//!
//! Terminal states never transition; the one documented exception is the
//! emergency stop, which revokes still-pending requests through a
//! crate-private privileged path.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::action::ActionKind;
use crate::clearance::ClearanceLevel;
use crate::identity::AgentIdentity;
use crate::time::{ts_millis, ts_millis_opt};

mod workflow;


pub use workflow::ApprovalWorkflow;

/// State of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    /// Awaiting decisions.
    Pending,
    /// Enough affirmative decisions were recorded.
    Approved,
    /// An approver rejected; a single rejection is final.
    Rejected,
    /// The absolute deadline passed without a decision.
    Expired,
    /// An approved request was revoked, or an emergency stop ran.
    Revoked,
}

impl ApprovalState {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Canonical lowercase name, matching the serde form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The human-in-the-loop artifact created for an L2 action attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// Unique approval id.
    pub id: Uuid,
    /// Id of the originating action request.
    pub action_id: Uuid,
    /// Kind of the originating action.
    pub action_kind: ActionKind,
    /// Current state.
    pub state: ApprovalState,
    /// Requesting agent, snapshotted at submission.
    pub requester: AgentIdentity,
    /// Submission timestamp.
    #[serde(with = "ts_millis")]
    pub created_at: DateTime<Utc>,
    /// Ids of the approvers chosen to decide this request, in registry
    /// insertion order.
    pub approver_ids: Vec<String>,
    /// Approver whose decision settled the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    /// When the request was settled.
    #[serde(
        default,
        with = "ts_millis_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub decided_at: Option<DateTime<Utc>>,
    /// Reason recorded on rejection or revocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Absolute deadline.
    #[serde(with = "ts_millis")]
    pub expires_at: DateTime<Utc>,
    /// Digest over the request's immutable identifying fields, bound at
    /// creation.
    pub evidence_hash: String,
}

/// Whether an approver approved or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    /// Affirmative.
    Approve,
    /// Negative; final for the whole request.
    Reject,
}

/// One approver's recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    /// Deciding approver.
    pub approver_id: String,
    /// Approve or reject.
    pub decision: DecisionKind,
    /// When the decision was recorded.
    #[serde(with = "ts_millis")]
    pub decided_at: DateTime<Utc>,
    /// Optional signature bytes, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
    /// Optional stated reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Errors surfaced by the approval workflow.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApprovalError {
    /// No approval request with the given id.
    #[error("approval request {approval_id} not found")]
    NotFound {
        /// The unknown approval id.
        approval_id: Uuid,
    },

    /// The request already left `pending`.
    #[error("approval request {approval_id} already decided: {state}")]
    AlreadyDecided {
        /// The approval id.
        approval_id: Uuid,
        /// Its terminal state.
        state: ApprovalState,
    },

    /// The approver is not in the request's chosen approver set.
    #[error("approver {approver_id} is not authorized for this approval request")]
    Unauthorized {
        /// The offending approver id.
        approver_id: String,
    },

    /// The approver is not (or no longer) registered.
    #[error("approver {approver_id} is not registered")]
    Unregistered {
        /// The unknown approver id.
        approver_id: String,
    },

    /// The approver already submitted a decision for this request.
    #[error("approver {approver_id} has already submitted a decision for this request")]
    DuplicateDecision {
        /// The approver id.
        approver_id: String,
    },

    /// The requested transition is not legal from the current state.
    #[error("approval request {approval_id} cannot transition from {from}")]
    InvalidTransition {
        /// The approval id.
        approval_id: Uuid,
        /// The state the request is in.
        from: ApprovalState,
    },

    /// Submission attempted with an empty approver registry.
    #[error("no approvers are registered")]
    NoApproversRegistered,

    /// Registration attempted for an approver below L2.
    #[error("approver {approver_id} must hold L2 clearance, has {clearance}")]
    InsufficientApproverClearance {
        /// The offending approver id.
        approver_id: String,
        /// The clearance it holds.
        clearance: ClearanceLevel,
    },
}

impl ApprovalError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyDecided { .. } => "ALREADY_DECIDED",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Unregistered { .. } => "UNREGISTERED",
            Self::DuplicateDecision { .. } => "DUPLICATE_DECISION",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::NoApproversRegistered => "NO_APPROVERS_REGISTERED",
            Self::InsufficientApproverClearance { .. } => "INSUFFICIENT_APPROVER_CLEARANCE",
        }
    }
}

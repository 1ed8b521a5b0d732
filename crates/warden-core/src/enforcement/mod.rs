//! Enforcement engine: clearance arithmetic, idempotency, sanitization.
//!
//! The engine decides whether a request may proceed; it never executes
//! anything and never owns approval state. For high-risk actions the
//! orchestrator hands it the current approval snapshot, and the verdict
//! says whether to run, wait, submit, or refuse.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::approval::ApprovalRequest;
use crate::clearance::ClearanceLevel;

mod engine;
mod sanitize;

#[cfg(test)]
mod tests;

pub use engine::EnforcementEngine;
pub use sanitize::sanitize_payload;

/// Pure decision produced by [`EnforcementEngine::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementVerdict {
    /// Clearance the action requires.
    pub required: ClearanceLevel,
    /// Clearance the agent holds.
    pub actual: ClearanceLevel,
    /// Whether clearance arithmetic allows the action.
    pub allowed: bool,
    /// Whether the action additionally needs human approval.
    pub requires_approval: bool,
    /// Denial reason, when not allowed.
    pub reason: Option<String>,
}

/// Outcome of [`EnforcementEngine::pre_execute`].
#[derive(Debug, Clone)]
pub enum PreDecision {
    /// Clear to invoke the executor with the sanitized payload.
    Proceed {
        /// Payload with structurally dangerous keys stripped.
        sanitized_payload: Value,
        /// The approved approval request, for high-risk actions.
        approval: Option<ApprovalRequest>,
    },
    /// High-risk action with no approval on file; one must be
    /// submitted.
    ApprovalRequired,
    /// High-risk action whose approval is still pending.
    AwaitingApproval {
        /// The pending approval request.
        approval: ApprovalRequest,
    },
    /// Policy rejection: the approval was rejected, expired, or
    /// revoked.
    Rejected {
        /// Human-readable rejection reason.
        reason: String,
        /// The terminal approval request.
        approval: ApprovalRequest,
    },
    /// The agent's clearance is below the action's requirement.
    ClearanceViolation {
        /// Clearance the action requires.
        required: ClearanceLevel,
        /// Clearance the agent holds.
        actual: ClearanceLevel,
        /// Human-readable denial reason.
        reason: String,
    },
    /// The request id was already executed; retries must mint a fresh
    /// id.
    AlreadyExecuted,
}

/// Compensating step reported after a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupAction {
    /// Undo partially applied changes.
    RollbackPendingChanges,
    /// Release resources held for the execution.
    ReleaseResources,
}

impl CleanupAction {
    /// Stable name carried in post-execution reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RollbackPendingChanges => "ROLLBACK_PENDING_CHANGES",
            Self::ReleaseResources => "RELEASE_RESOURCES",
        }
    }
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report returned by [`EnforcementEngine::post_execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostOutcome {
    /// Compensating steps the caller should run; empty on success.
    pub cleanup_actions: Vec<CleanupAction>,
}

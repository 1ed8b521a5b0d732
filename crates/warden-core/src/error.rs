//! Crate-level error taxonomy.

use thiserror::Error;
use uuid::Uuid;

use crate::action::ActionKind;
use crate::approval::ApprovalError;
use crate::audit::{AuditEntry, AuditError};
use crate::clearance::ClearanceLevel;

/// Tagged error surfaced by the orchestrator.
///
/// Every variant carries a stable [`GovernanceError::code`]; variants
/// raised after an audit append embed the entry so callers can link the
/// failure to the trail. Nothing is recovered on the caller's behalf —
/// executor failures and policy rejections both surface here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GovernanceError {
    /// The agent's clearance is below the action's requirement. A
    /// failed audit entry was appended before raising.
    #[error("insufficient clearance for {kind}: required {required}, actual {actual}")]
    ClearanceViolation {
        /// Kind of the denied action.
        kind: ActionKind,
        /// Clearance the action requires.
        required: ClearanceLevel,
        /// Clearance the agent holds.
        actual: ClearanceLevel,
        /// The failed audit entry.
        entry: Box<AuditEntry>,
    },

    /// Non-clearance policy rejection (rejected, expired, or revoked
    /// approval). A failed audit entry was appended before raising.
    #[error("enforcement rejected action: {reason}")]
    EnforcementRejected {
        /// Human-readable rejection reason.
        reason: String,
        /// The failed audit entry.
        entry: Box<AuditEntry>,
    },

    /// Idempotency guard: the request id was already executed. No new
    /// audit entry is appended.
    #[error("action {action_id} has already been executed")]
    AlreadyExecuted {
        /// The repeated request id.
        action_id: Uuid,
    },

    /// The caller-supplied executor failed. A failed audit entry was
    /// appended before raising.
    #[error("executor failed: {message}")]
    ExecutionFailed {
        /// The executor's error, rendered.
        message: String,
        /// The failed audit entry.
        entry: Box<AuditEntry>,
    },

    /// Surfaced from the approval workflow; no audit entry.
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    /// Surfaced from the audit trail.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl GovernanceError {
    /// Stable error code for logs and wire surfaces.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ClearanceViolation { .. } => "CLEARANCE_VIOLATION",
            Self::EnforcementRejected { .. } => "ENFORCEMENT_REJECTED",
            Self::AlreadyExecuted { .. } => "ALREADY_EXECUTED",
            Self::ExecutionFailed { .. } => "EXECUTION_FAILED",
            Self::Approval(inner) => inner.code(),
            Self::Audit(inner) => inner.code(),
        }
    }

    /// The audit entry embedded in this error, when one was appended.
    #[must_use]
    pub fn audit_entry(&self) -> Option<&AuditEntry> {
        match self {
            Self::ClearanceViolation { entry, .. }
            | Self::EnforcementRejected { entry, .. }
            | Self::ExecutionFailed { entry, .. } => Some(entry),
            Self::AlreadyExecuted { .. } | Self::Approval(_) | Self::Audit(_) => None,
        }
    }
}

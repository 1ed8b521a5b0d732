//! # warden-core
//!
//! Governance kernel for autonomous agents: every action an agent
//! attempts against a protected resource plane is mediated by one
//! [`MissionControl`] instance, which
//!
//! - decides whether the requester has sufficient clearance,
//! - pauses the highest-risk actions until human operators approve
//!   them, and
//! - appends a hash-chained, tamper-evident record of the attempt to an
//!   audit trail.
//!
//! ## Architecture
//!
//! - [`enforcement`] — clearance arithmetic, idempotency, payload
//!   sanitization, pre/post execution hooks
//! - [`approval`] — approver registry and the pending → approved /
//!   rejected / expired / revoked state machine, with escalation and
//!   absolute-deadline timers
//! - [`audit`] — append-only hash chain with verification, range
//!   queries, and a JSON export artifact
//! - [`control`] — the orchestrator sequencing enforcement → executor →
//!   audit and fanning events out to subscribers
//!
//! The kernel holds no locks across the caller-supplied executor and
//! never executes actions itself; persistence, notification transport,
//! and dashboards are collaborator concerns fed by the event hook and
//! the export artifact.
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use warden_core::prelude::*;
//!
//! # fn main() -> Result<(), warden_core::GovernanceError> {
//! let control = MissionControl::new(GovernanceConfig::default());
//! let agent = AgentIdentity::new("agent-1", "reader", ClearanceLevel::L0, "sess-1");
//!
//! let outcome = control.execute(ActionKind::QueryStatus, &agent, json!({}), |_payload| {
//!     Ok(json!({"status": "ok"}))
//! })?;
//!
//! assert!(control.verify_audit_integrity());
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```
//!
//! High-risk (L2) actions suspend instead of running: the first
//! `execute` returns a pending reference, registered approvers decide it
//! via [`MissionControl::approve_action`], and the caller re-invokes
//! `execute` to run the action under the approved request.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod action;
pub mod approval;
pub mod audit;
pub mod clearance;
pub mod config;
pub mod control;
pub mod enforcement;
pub mod error;
pub mod events;
pub mod hash;
pub mod identity;
pub mod time;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::action::{ActionKind, ActionRequest, ActionResult};
    pub use crate::approval::{ApprovalRequest, ApprovalState};
    pub use crate::audit::{AuditEntry, AuditTrail};
    pub use crate::clearance::ClearanceLevel;
    pub use crate::config::GovernanceConfig;
    pub use crate::control::{ExecutionOutcome, MissionControl, PendingApproval};
    pub use crate::error::GovernanceError;
    pub use crate::events::{EventKind, GovernanceEvent, Severity};
    pub use crate::identity::{AgentIdentity, ApproverIdentity};
}

/// Re-export commonly used types at the crate root.
pub use action::{ActionKind, ActionRequest, ActionResult};
pub use approval::{ApprovalRequest, ApprovalState, ApprovalWorkflow};
pub use audit::{AuditEntry, AuditTrail};
pub use clearance::ClearanceLevel;
pub use config::GovernanceConfig;
pub use control::{ExecutionOutcome, MissionControl, PendingApproval};
pub use enforcement::EnforcementEngine;
pub use error::GovernanceError;
pub use events::{EventBus, EventKind, GovernanceEvent, Severity};
pub use hash::HashAlgorithm;
pub use identity::{AgentIdentity, ApproverIdentity};

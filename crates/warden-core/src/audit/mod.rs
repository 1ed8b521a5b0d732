//! Append-only, hash-chained audit trail.
//!
//! Every governed action attempt ends in exactly one [`AuditEntry`].
//! Entries are chained: each carries the previous entry's hash, its own
//! content hash, and an immutable proof binding the two to the sequence
//! number and timestamp. Any later mutation of a recorded entry is
//! detectable by [`AuditTrail::verify_chain`], which reports the first
//! broken sequence and a [`TamperReason`].
//!
//! # Chain invariants
//!
//! - Sequence numbers are dense and monotonic, starting at 1.
//! - Entry *n*'s `previous_hash` equals entry *n−1*'s `entry_hash`;
//!   entry 1 links to the genesis hash.
//! - `entry_hash` covers the canonical bytes of the entry
//!   (see [`canonical`] for the exact field order — it is the wire
//!   contract for audit portability).
//! - `immutable_proof` covers `{entry_hash, previous_hash, sequence,
//!   timestamp}`.
//!
//! The trail is in-memory; durability belongs to a persistence
//! collaborator, which can subscribe to events, pull
//! [`AuditTrail::export_json`], and re-check restored data with
//! [`verify_entries`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::action::{ActionKind, ActionRequest, ActionResult};
use crate::approval::ApprovalRequest;
use crate::config::GovernanceConfig;
use crate::identity::AgentIdentity;
use crate::time::ts_millis;

pub(crate) mod canonical;
mod trail;


pub use trail::{AuditTrail, verify_entries};

/// One immutable record of an attempted action and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuditEntry {
    /// Unique entry id.
    pub id: Uuid,
    /// When the entry was appended.
    #[serde(with = "ts_millis")]
    pub timestamp: DateTime<Utc>,
    /// Dense sequence number, starting at 1.
    pub sequence: u64,
    /// The attempted action.
    pub action: ActionRequest,
    /// Its outcome.
    pub result: ActionResult,
    /// Requesting agent, snapshotted at append time.
    pub agent: AgentIdentity,
    /// Approval request attached to high-risk actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
    /// `entry_hash` of the previous entry, or the genesis hash.
    pub previous_hash: String,
    /// Hash over this entry's canonical bytes.
    pub entry_hash: String,
    /// Proof binding `entry_hash`, `previous_hash`, sequence, and
    /// timestamp.
    pub immutable_proof: String,
}

/// Why chain verification failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TamperReason {
    /// An entry no longer links to its predecessor's hash.
    PreviousHashMismatch,
    /// An entry's content no longer matches its recorded hash.
    EntryHashMismatch,
    /// The immutable proof no longer matches its inputs.
    ProofMismatch,
}

impl TamperReason {
    /// Stable reason code carried on tamper events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreviousHashMismatch => "PREVIOUS_HASH_MISMATCH",
            Self::EntryHashMismatch => "ENTRY_HASH_MISMATCH",
            Self::ProofMismatch => "PROOF_MISMATCH",
        }
    }
}

impl fmt::Display for TamperReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of walking the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// Every entry verified.
    Valid,
    /// Verification failed at `sequence`.
    Broken {
        /// First sequence that failed to verify.
        sequence: u64,
        /// What failed.
        reason: TamperReason,
    },
}

impl ChainStatus {
    /// Whether the chain verified end to end.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Errors surfaced by the audit trail.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuditError {
    /// The export artifact failed to serialize.
    #[error("audit export serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An action request id was already recorded as a primary action.
    #[error("action {action_id} already has an audit entry")]
    DuplicateAction {
        /// The duplicated action request id.
        action_id: Uuid,
    },

    /// A successful high-risk entry arrived without an approved approval.
    #[error("successful {kind} entry for action {action_id} requires an approved approval request")]
    MissingApproval {
        /// Kind of the offending action.
        kind: ActionKind,
        /// Its request id.
        action_id: Uuid,
    },

    /// The in-memory chain was found tampered before an append.
    #[error("audit trail integrity violation at sequence {sequence}: {reason}")]
    IntegrityViolation {
        /// Sequence of the entry that failed re-verification.
        sequence: u64,
        /// What failed.
        reason: TamperReason,
    },
}

impl AuditError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Serialization(_) => "AUDIT_SERIALIZATION",
            Self::DuplicateAction { .. } => "DUPLICATE_ACTION",
            Self::MissingApproval { .. } => "MISSING_APPROVAL",
            Self::IntegrityViolation { .. } => "AUDIT_INTEGRITY_VIOLATION",
        }
    }
}

/// The compliance artifact produced by [`AuditTrail::export_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditExport {
    /// Genesis hash the chain is anchored to.
    pub genesis_hash: String,
    /// Number of entries at export time.
    pub entry_count: u64,
    /// Governance configuration snapshot.
    pub config: GovernanceConfig,
    /// Every entry, in sequence order, with all chain fields.
    pub entries: Vec<AuditEntry>,
    /// Whether the chain verified at export time.
    pub chain_valid: bool,
}

//! Agent and approver identities.
//!
//! Identities are opaque to the kernel: ids are caller-assigned strings and
//! public keys are raw bytes that the kernel never interprets. Signature
//! verification is a collaborator concern.

use serde::{Deserialize, Serialize};

use crate::clearance::ClearanceLevel;

/// An autonomous agent as seen by the governance kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    /// Opaque agent id.
    pub id: String,
    /// Human-readable name for audit entries and dashboards.
    pub display_name: String,
    /// Clearance the agent holds.
    pub clearance: ClearanceLevel,
    /// Session the agent is operating under.
    pub session_id: String,
    /// Optional public key bytes, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Vec<u8>>,
}

impl AgentIdentity {
    /// Creates an agent identity without a public key.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        clearance: ClearanceLevel,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            clearance,
            session_id: session_id.into(),
            public_key: None,
        }
    }
}

/// A human operator authorized to decide approval requests.
///
/// Approvers must hold [`ClearanceLevel::L2`]; the approval workflow
/// rejects registration of anything lower. [`ApproverIdentity::new`]
/// builds an L2 approver directly, so the only way to construct an
/// unregisterable approver is to set `clearance` by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverIdentity {
    /// Opaque approver id.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Clearance held; must be L2 to register.
    pub clearance: ClearanceLevel,
    /// Optional contact address for notifier collaborators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Optional public key bytes, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Vec<u8>>,
}

impl ApproverIdentity {
    /// Creates an L2 approver.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            clearance: ClearanceLevel::L2,
            contact: None,
            public_key: None,
        }
    }

    /// Attaches a contact address.
    #[must_use]
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

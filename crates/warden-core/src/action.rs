//! Action kinds and the request/result pair that travels through the
//! kernel.
//!
//! Every [`ActionKind`] is bound to a required [`ClearanceLevel`] at build
//! time: [`ActionKind::required_clearance`] is an exhaustive match, so
//! adding a kind without a clearance binding fails to compile.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clearance::ClearanceLevel;
use crate::time::ts_millis;

/// Closed enumeration of governable actions, partitioned by clearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Read publicly visible data.
    ReadPublic,
    /// Query operational status.
    QueryStatus,
    /// Enumerate resources.
    ListResources,
    /// Change configuration of a non-production surface.
    ModifyConfig,
    /// Roll out a service.
    DeployService,
    /// Create, rotate, or read managed secrets.
    ManageSecrets,
    /// Run a whitelisted command.
    ExecuteCommand,
    /// Destroy a resource.
    DestroyResource,
    /// Mutate production state.
    ModifyProduction,
    /// Move funds between accounts.
    TransferFunds,
    /// Delete audit records.
    DeleteAuditLog,
    /// Raise a principal's privileges.
    EscalatePrivileges,
    /// Run an arbitrary, non-whitelisted command.
    ExecuteArbitrary,
}

impl ActionKind {
    /// Every action kind, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::ReadPublic,
        Self::QueryStatus,
        Self::ListResources,
        Self::ModifyConfig,
        Self::DeployService,
        Self::ManageSecrets,
        Self::ExecuteCommand,
        Self::DestroyResource,
        Self::ModifyProduction,
        Self::TransferFunds,
        Self::DeleteAuditLog,
        Self::EscalatePrivileges,
        Self::ExecuteArbitrary,
    ];

    /// The clearance an agent must hold to perform this action.
    ///
    /// The match is exhaustive on purpose: an action kind with no binding
    /// is a compile error, never a runtime default.
    #[must_use]
    pub const fn required_clearance(self) -> ClearanceLevel {
        match self {
            Self::ReadPublic | Self::QueryStatus | Self::ListResources => ClearanceLevel::L0,
            Self::ModifyConfig
            | Self::DeployService
            | Self::ManageSecrets
            | Self::ExecuteCommand => ClearanceLevel::L1,
            Self::DestroyResource
            | Self::ModifyProduction
            | Self::TransferFunds
            | Self::DeleteAuditLog
            | Self::EscalatePrivileges
            | Self::ExecuteArbitrary => ClearanceLevel::L2,
        }
    }

    /// Canonical kebab-case name, matching the serde form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadPublic => "read-public",
            Self::QueryStatus => "query-status",
            Self::ListResources => "list-resources",
            Self::ModifyConfig => "modify-config",
            Self::DeployService => "deploy-service",
            Self::ManageSecrets => "manage-secrets",
            Self::ExecuteCommand => "execute-command",
            Self::DestroyResource => "destroy-resource",
            Self::ModifyProduction => "modify-production",
            Self::TransferFunds => "transfer-funds",
            Self::DeleteAuditLog => "delete-audit-log",
            Self::EscalatePrivileges => "escalate-privileges",
            Self::ExecuteArbitrary => "execute-arbitrary",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single attempted action. Created once at entry to the orchestrator
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    /// Unique per request. Retries mint a fresh id.
    pub id: Uuid,
    /// What the agent is attempting.
    pub kind: ActionKind,
    /// Id of the requesting agent.
    pub agent_id: String,
    /// Creation timestamp.
    #[serde(with = "ts_millis")]
    pub created_at: DateTime<Utc>,
    /// Opaque payload handed to the executor after sanitization.
    pub payload: Value,
    /// Optional signature over the request, treated as opaque bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
    /// Optional caller-supplied correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ActionRequest {
    /// Creates a request with a fresh id.
    #[must_use]
    pub fn new(
        kind: ActionKind,
        agent_id: impl Into<String>,
        created_at: DateTime<Utc>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            agent_id: agent_id.into(),
            created_at,
            payload,
            signature: None,
            correlation_id: None,
        }
    }

    /// Attaches a correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attaches opaque signature bytes.
    #[must_use]
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }
}

/// Outcome of one executed (or rejected) action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Whether the action completed successfully.
    pub success: bool,
    /// The originating request id.
    pub action_id: Uuid,
    /// Completion timestamp.
    #[serde(with = "ts_millis")]
    pub completed_at: DateTime<Utc>,
    /// Executor output, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error description for failed actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Id of the executing party, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<String>,
}

impl ActionResult {
    /// Builds a successful result.
    #[must_use]
    pub fn success(action_id: Uuid, completed_at: DateTime<Utc>, output: Option<Value>) -> Self {
        Self {
            success: true,
            action_id,
            completed_at,
            output,
            error: None,
            executed_by: None,
        }
    }

    /// Builds a failed result carrying an error description.
    #[must_use]
    pub fn failure(action_id: Uuid, completed_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            action_id,
            completed_at,
            output: None,
            error: Some(error.into()),
            executed_by: None,
        }
    }
}

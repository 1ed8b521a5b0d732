//! Governance configuration.

use serde::{Deserialize, Serialize};

use crate::hash::HashAlgorithm;

/// Configuration for one orchestrator instance.
///
/// Every field has a default, and the serde form accepts partial
/// documents, so `GovernanceConfig::default()` and `{}` both produce a
/// working configuration. The snapshot is embedded in the audit export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernanceConfig {
    /// Absolute approval deadline for L2 actions, in milliseconds.
    pub l2_approval_timeout_ms: u64,

    /// Affirmative decisions required to approve an L2 action. When the
    /// registry holds fewer approvers, the registry size is used
    /// instead.
    pub required_approvers: usize,

    /// When true, the absolute deadline moves a still-pending approval
    /// to `expired`. When false the deadline only emits the
    /// `approval-timeout` warning and the request keeps waiting for a
    /// human decision.
    pub auto_reject_on_timeout: bool,

    /// Advisory retention window for the persistence collaborator; the
    /// in-memory trail never truncates. Also bound into the genesis
    /// hash.
    pub audit_retention_days: u32,

    /// Hash algorithm for the audit chain and evidence digests.
    pub hash_algorithm: HashAlgorithm,

    /// When false, tamper detection is still computed but not enforced
    /// at append time. Test hook only.
    pub enable_immutable_audit: bool,

    /// Reserved for a future cryptographically guarded emergency-stop
    /// path. Carried opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_override_key: Option<String>,

    /// Upper cap on the number of approvers chosen for one request.
    pub max_approvers: usize,

    /// When true, every chosen approver must submit an affirmative
    /// decision before the request approves.
    pub require_unanimous: bool,

    /// Time until the escalation warning, in milliseconds. Must fall
    /// strictly before the absolute deadline; a configured value at or
    /// past `l2_approval_timeout_ms` is clamped to half the deadline.
    pub escalation_timeout_ms: u64,

    /// Opaque channel names surfaced to notifier collaborators.
    pub notify_channels: Vec<String>,

    /// Advisory flag surfaced to notifier collaborators; the kernel
    /// does not verify MFA itself.
    pub require_mfa: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            l2_approval_timeout_ms: 300_000,
            required_approvers: 1,
            auto_reject_on_timeout: true,
            audit_retention_days: 365,
            hash_algorithm: HashAlgorithm::Sha256,
            enable_immutable_audit: true,
            emergency_override_key: None,
            max_approvers: 3,
            require_unanimous: false,
            escalation_timeout_ms: 300_000,
            notify_channels: Vec::new(),
            require_mfa: true,
        }
    }
}

impl GovernanceConfig {
    /// Escalation delay actually used for scheduling: the configured
    /// value, clamped to half the absolute deadline when the two would
    /// otherwise collide.
    #[must_use]
    pub fn effective_escalation_ms(&self) -> u64 {
        if self.escalation_timeout_ms >= self.l2_approval_timeout_ms {
            self.l2_approval_timeout_ms / 2
        } else {
            self.escalation_timeout_ms
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GovernanceConfig::default();
        assert_eq!(config.l2_approval_timeout_ms, 300_000);
        assert_eq!(config.required_approvers, 1);
        assert!(config.auto_reject_on_timeout);
        assert_eq!(config.audit_retention_days, 365);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert!(config.enable_immutable_audit);
        assert!(config.emergency_override_key.is_none());
        assert_eq!(config.max_approvers, 3);
        assert!(!config.require_unanimous);
        assert_eq!(config.escalation_timeout_ms, 300_000);
        assert!(config.notify_channels.is_empty());
        assert!(config.require_mfa);
    }

    #[test]
    fn partial_documents_deserialize() {
        let config: GovernanceConfig =
            serde_json::from_str(r#"{"hashAlgorithm":"SHA-512","requiredApprovers":2}"#).unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.required_approvers, 2);
        assert_eq!(config.l2_approval_timeout_ms, 300_000);
    }

    #[test]
    fn colliding_escalation_is_clamped_before_expiry() {
        let config = GovernanceConfig::default();
        // Defaults collide; the effective value must strictly precede
        // the absolute deadline.
        assert_eq!(config.effective_escalation_ms(), 150_000);

        let distinct = GovernanceConfig {
            escalation_timeout_ms: 60_000,
            ..GovernanceConfig::default()
        };
        assert_eq!(distinct.effective_escalation_ms(), 60_000);
    }
}

//! The in-memory audit trail implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::canonical;
use super::{AuditEntry, AuditError, AuditExport, ChainStatus, TamperReason};
use crate::action::{ActionKind, ActionRequest, ActionResult};
use crate::approval::{ApprovalRequest, ApprovalState};
use crate::clearance::ClearanceLevel;
use crate::config::GovernanceConfig;
use crate::events::{EventBus, GovernanceEvent};
use crate::hash::HashAlgorithm;
use crate::identity::AgentIdentity;
use crate::time::{Clock, truncate_millis};

struct TrailInner {
    entries: Vec<AuditEntry>,
    by_id: HashMap<Uuid, usize>,
    recorded_actions: HashSet<Uuid>,
}

/// Append-only, hash-chained audit log.
///
/// Appends are serialized by the trail's mutex, so sequence numbers are
/// strictly monotonic and each entry links to the hash of its immediate
/// predecessor. Reads return snapshots; recorded entries are never handed
/// out by reference.
pub struct AuditTrail {
    algorithm: HashAlgorithm,
    genesis_hash: String,
    enforce_immutable: bool,
    config: GovernanceConfig,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    inner: Mutex<TrailInner>,
}

impl AuditTrail {
    /// Creates an empty trail anchored to a freshly computed genesis
    /// hash.
    ///
    /// The genesis hash covers the hash algorithm, the advisory
    /// retention window, and the creation timestamp, so two trails never
    /// share an anchor.
    #[must_use]
    pub fn new(config: GovernanceConfig, clock: Arc<dyn Clock>, bus: EventBus) -> Self {
        let created_at = truncate_millis(clock.now());
        let algorithm = config.hash_algorithm;
        let genesis_hash = algorithm.digest_hex(&canonical::genesis_input(
            algorithm,
            config.audit_retention_days,
            &created_at,
        ));
        Self {
            algorithm,
            genesis_hash,
            enforce_immutable: config.enable_immutable_audit,
            config,
            clock,
            bus,
            inner: Mutex::new(TrailInner {
                entries: Vec::new(),
                by_id: HashMap::new(),
                recorded_actions: HashSet::new(),
            }),
        }
    }

    /// The genesis hash this trail is anchored to.
    #[must_use]
    pub fn genesis_hash(&self) -> &str {
        &self.genesis_hash
    }

    /// The hash algorithm in use.
    #[must_use]
    pub const fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Appends an entry and returns a copy of it.
    ///
    /// Allocates the next sequence number, snapshots the previous hash,
    /// and computes both digests under the append lock.
    ///
    /// # Errors
    ///
    /// - [`AuditError::DuplicateAction`] if `action.id` is already the
    ///   primary action of a recorded entry.
    /// - [`AuditError::MissingApproval`] if a successful L2 entry
    ///   arrives without an `approved` approval reference (skipped when
    ///   `enable_immutable_audit` is off).
    /// - [`AuditError::IntegrityViolation`] if the current tip fails
    ///   re-verification before the append (skipped when
    ///   `enable_immutable_audit` is off).
    pub fn record(
        &self,
        action: &ActionRequest,
        result: &ActionResult,
        agent: &AgentIdentity,
        approval: Option<&ApprovalRequest>,
    ) -> Result<AuditEntry, AuditError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if inner.recorded_actions.contains(&action.id) {
            return Err(AuditError::DuplicateAction {
                action_id: action.id,
            });
        }

        if self.enforce_immutable {
            if result.success
                && action.kind.required_clearance() == ClearanceLevel::L2
                && !approval.is_some_and(|a| a.state == ApprovalState::Approved)
            {
                return Err(AuditError::MissingApproval {
                    kind: action.kind,
                    action_id: action.id,
                });
            }
            if let Some(last) = inner.entries.last() {
                let recomputed = self.entry_hash_of(last);
                if !constant_time_str_eq(&recomputed, &last.entry_hash) {
                    return Err(AuditError::IntegrityViolation {
                        sequence: last.sequence,
                        reason: TamperReason::EntryHashMismatch,
                    });
                }
            }
        }

        let sequence = inner.entries.len() as u64 + 1;
        let previous_hash = inner
            .entries
            .last()
            .map_or_else(|| self.genesis_hash.clone(), |e| e.entry_hash.clone());
        let timestamp = truncate_millis(self.clock.now());
        let id = Uuid::new_v4();
        let entry_hash = self.algorithm.digest_hex(&canonical::entry_hash_input(
            &id,
            &timestamp,
            sequence,
            &action.id,
            result.success,
            &agent.id,
            &previous_hash,
        ));
        let immutable_proof = self.algorithm.digest_hex(&canonical::proof_input(
            &entry_hash,
            &previous_hash,
            sequence,
            &timestamp,
        ));

        let entry = AuditEntry {
            id,
            timestamp,
            sequence,
            action: action.clone(),
            result: result.clone(),
            agent: agent.clone(),
            approval: approval.cloned(),
            previous_hash,
            entry_hash,
            immutable_proof,
        };

        let index = inner.entries.len();
        inner.by_id.insert(id, index);
        inner.recorded_actions.insert(action.id);
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    /// Walks the whole chain, reporting the first broken entry.
    ///
    /// On a break this emits one `audit-tamper-detected` event at
    /// critical severity and logs the failing sequence.
    pub fn verify_chain_detailed(&self) -> ChainStatus {
        let status = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            verify_entries(&inner.entries, &self.genesis_hash, self.algorithm)
        };
        if let ChainStatus::Broken { sequence, reason } = status {
            tracing::error!(sequence, reason = %reason, "audit chain verification failed");
            self.bus
                .emit(&GovernanceEvent::AuditTamperDetected { sequence, reason });
        }
        status
    }

    /// Whether the whole chain verifies. See
    /// [`AuditTrail::verify_chain_detailed`].
    pub fn verify_chain(&self) -> bool {
        self.verify_chain_detailed().is_valid()
    }

    /// Returns the entry with the given id.
    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<AuditEntry> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_id
            .get(id)
            .and_then(|idx| inner.entries.get(*idx))
            .cloned()
    }

    /// Snapshot of every entry, in sequence order.
    #[must_use]
    pub fn all(&self) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    /// Entries whose primary action has the given kind.
    #[must_use]
    pub fn by_action(&self, kind: ActionKind) -> Vec<AuditEntry> {
        self.filtered(|entry| entry.action.kind == kind)
    }

    /// Entries recorded for the given agent.
    #[must_use]
    pub fn by_agent(&self, agent_id: &str) -> Vec<AuditEntry> {
        self.filtered(|entry| entry.agent.id == agent_id)
    }

    /// Entries whose timestamp falls in `[start, end]` (inclusive).
    #[must_use]
    pub fn by_time_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<AuditEntry> {
        self.filtered(|entry| entry.timestamp >= start && entry.timestamp <= end)
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether the trail is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The last `entry_hash`, or the genesis hash on an empty trail.
    ///
    /// External timestamping collaborators anchor against this value.
    #[must_use]
    pub fn latest_anchor(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .last()
            .map_or_else(|| self.genesis_hash.clone(), |e| e.entry_hash.clone())
    }

    /// Builds the export artifact.
    ///
    /// `chain_valid` is computed at export time without emitting tamper
    /// events; callers that want the event should run
    /// [`AuditTrail::verify_chain`] as well.
    #[must_use]
    pub fn export(&self) -> AuditExport {
        let (entries, chain_valid) = {
            let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let chain_valid =
                verify_entries(&inner.entries, &self.genesis_hash, self.algorithm).is_valid();
            (inner.entries.clone(), chain_valid)
        };
        AuditExport {
            genesis_hash: self.genesis_hash.clone(),
            entry_count: entries.len() as u64,
            config: self.config.clone(),
            entries,
            chain_valid,
        }
    }

    /// Serializes the export artifact to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Serialization`] if the artifact fails to
    /// serialize.
    pub fn export_json(&self) -> Result<String, AuditError> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    fn filtered<F: Fn(&AuditEntry) -> bool>(&self, keep: F) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .filter(|entry| keep(entry))
            .cloned()
            .collect()
    }

    fn entry_hash_of(&self, entry: &AuditEntry) -> String {
        self.algorithm.digest_hex(&canonical::entry_hash_input(
            &entry.id,
            &entry.timestamp,
            entry.sequence,
            &entry.action.id,
            entry.result.success,
            &entry.agent.id,
            &entry.previous_hash,
        ))
    }

    /// Mutates a recorded entry in place. Unit-test hook for exercising
    /// tamper detection; not compiled into the library.
    #[cfg(test)]
    pub(crate) fn tamper_with_entry<F: FnOnce(&mut AuditEntry)>(&self, sequence: u64, mutate: F) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let index = usize::try_from(sequence.saturating_sub(1)).expect("sequence fits usize");
        if let Some(entry) = inner.entries.get_mut(index) {
            mutate(entry);
        }
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("algorithm", &self.algorithm)
            .field("genesis_hash", &self.genesis_hash)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// Re-verifies a chain of entries against a genesis hash.
///
/// This is the portable half of [`AuditTrail::verify_chain`]: it works on
/// exported entries, so a persistence collaborator can validate restored
/// data before trusting it. Hash comparisons are constant-time.
#[must_use]
pub fn verify_entries(
    entries: &[AuditEntry],
    genesis_hash: &str,
    algorithm: HashAlgorithm,
) -> ChainStatus {
    let mut previous = genesis_hash;
    for entry in entries {
        if !constant_time_str_eq(&entry.previous_hash, previous) {
            return ChainStatus::Broken {
                sequence: entry.sequence,
                reason: TamperReason::PreviousHashMismatch,
            };
        }
        let recomputed = algorithm.digest_hex(&canonical::entry_hash_input(
            &entry.id,
            &entry.timestamp,
            entry.sequence,
            &entry.action.id,
            entry.result.success,
            &entry.agent.id,
            &entry.previous_hash,
        ));
        if !constant_time_str_eq(&entry.entry_hash, &recomputed) {
            return ChainStatus::Broken {
                sequence: entry.sequence,
                reason: TamperReason::EntryHashMismatch,
            };
        }
        let proof = algorithm.digest_hex(&canonical::proof_input(
            &entry.entry_hash,
            &entry.previous_hash,
            entry.sequence,
            &entry.timestamp,
        ));
        if !constant_time_str_eq(&entry.immutable_proof, &proof) {
            return ChainStatus::Broken {
                sequence: entry.sequence,
                reason: TamperReason::ProofMismatch,
            };
        }
        previous = &entry.entry_hash;
    }
    ChainStatus::Valid
}

fn constant_time_str_eq(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

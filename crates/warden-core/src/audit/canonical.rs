//! Canonical byte layouts for the audit chain.
//!
//! These encodings are the wire contract: an external verifier that
//! re-implements them byte for byte can re-check an exported trail
//! without this crate. Field order is fixed and documented per input;
//! every field is length-prefixed (strings) or fixed-width big-endian
//! (integers), and each hash purpose has its own domain separator so a
//! digest can never be replayed across purposes.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::hash::{CanonicalBytes, HashAlgorithm};
use crate::time::iso_millis;

/// Domain separator for entry content hashes.
pub(crate) const ENTRY_DOMAIN: &[u8] = b"warden.audit.entry.v1\0";
/// Domain separator for immutable proofs.
pub(crate) const PROOF_DOMAIN: &[u8] = b"warden.audit.proof.v1\0";
/// Domain separator for the genesis hash.
pub(crate) const GENESIS_DOMAIN: &[u8] = b"warden.audit.genesis.v1\0";

/// Canonical input for an entry hash.
///
/// Field order: `id`, ISO-8601 millisecond timestamp, `sequence`
/// (big-endian `u64`), action request id, success flag (one byte),
/// agent id, `previous_hash`.
pub(crate) fn entry_hash_input(
    id: &Uuid,
    timestamp: &DateTime<Utc>,
    sequence: u64,
    action_id: &Uuid,
    success: bool,
    agent_id: &str,
    previous_hash: &str,
) -> Vec<u8> {
    let mut bytes = CanonicalBytes::with_domain(ENTRY_DOMAIN);
    bytes.push_uuid(id);
    bytes.push_str(&iso_millis(timestamp));
    bytes.push_u64(sequence);
    bytes.push_uuid(action_id);
    bytes.push_bool(success);
    bytes.push_str(agent_id);
    bytes.push_str(previous_hash);
    bytes.finish()
}

/// Canonical input for an immutable proof.
///
/// Field order: `entry_hash`, `previous_hash`, `sequence` (big-endian
/// `u64`), ISO-8601 millisecond timestamp.
pub(crate) fn proof_input(
    entry_hash: &str,
    previous_hash: &str,
    sequence: u64,
    timestamp: &DateTime<Utc>,
) -> Vec<u8> {
    let mut bytes = CanonicalBytes::with_domain(PROOF_DOMAIN);
    bytes.push_str(entry_hash);
    bytes.push_str(previous_hash);
    bytes.push_u64(sequence);
    bytes.push_str(&iso_millis(timestamp));
    bytes.finish()
}

/// Canonical input for the genesis hash.
///
/// Field order: hash algorithm name, retention days (big-endian `u32`),
/// ISO-8601 millisecond creation timestamp.
pub(crate) fn genesis_input(
    algorithm: HashAlgorithm,
    retention_days: u32,
    created_at: &DateTime<Utc>,
) -> Vec<u8> {
    let mut bytes = CanonicalBytes::with_domain(GENESIS_DOMAIN);
    bytes.push_str(algorithm.as_str());
    bytes.push_u32(retention_days);
    bytes.push_str(&iso_millis(created_at));
    bytes.finish()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn inputs_are_domain_separated() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let proof = proof_input("e", "p", 1, &ts);
        let genesis = genesis_input(HashAlgorithm::Sha256, 365, &ts);
        assert!(proof.starts_with(PROOF_DOMAIN));
        assert!(genesis.starts_with(GENESIS_DOMAIN));
        assert_ne!(proof, genesis);
    }

    #[test]
    fn entry_input_varies_by_every_field() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let id = Uuid::new_v4();
        let action = Uuid::new_v4();
        let base = entry_hash_input(&id, &ts, 1, &action, true, "a", "prev");
        assert_ne!(
            base,
            entry_hash_input(&id, &ts, 2, &action, true, "a", "prev")
        );
        assert_ne!(
            base,
            entry_hash_input(&id, &ts, 1, &action, false, "a", "prev")
        );
        assert_ne!(
            base,
            entry_hash_input(&id, &ts, 1, &action, true, "b", "prev")
        );
        assert_ne!(
            base,
            entry_hash_input(&id, &ts, 1, &action, true, "a", "other")
        );
    }
}

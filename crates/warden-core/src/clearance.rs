//! Clearance levels for agents, approvers, and action kinds.
//!
//! A clearance level is a totally ordered rank. An agent may perform an
//! action when its own level is at least the level the action requires;
//! the comparison is by rank, never by name.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered clearance rank attached to agents, approvers, and action kinds.
///
/// `L0 < L1 < L2`. The derived `Ord` implementation is the rank order, so
/// clearance arithmetic is plain comparison:
///
/// ```rust
/// use warden_core::clearance::ClearanceLevel;
///
/// assert!(ClearanceLevel::L2 > ClearanceLevel::L0);
/// assert!(ClearanceLevel::L1.satisfies(ClearanceLevel::L1));
/// assert!(!ClearanceLevel::L0.satisfies(ClearanceLevel::L1));
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ClearanceLevel {
    /// Read-only, publicly observable operations.
    #[default]
    L0,
    /// Mutating operations on non-critical resources.
    L1,
    /// Destructive or irreversible operations; always requires human
    /// approval.
    L2,
}

impl ClearanceLevel {
    /// Numeric rank used for comparison and event payloads.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::L0 => 0,
            Self::L1 => 1,
            Self::L2 => 2,
        }
    }

    /// Returns the canonical string form (`"L0"`, `"L1"`, `"L2"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::L0 => "L0",
            Self::L1 => "L1",
            Self::L2 => "L2",
        }
    }

    /// Whether a holder of `self` meets a requirement of `required`.
    #[must_use]
    pub fn satisfies(self, required: Self) -> bool {
        self >= required
    }
}

impl fmt::Display for ClearanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_order_is_total() {
        assert!(ClearanceLevel::L0 < ClearanceLevel::L1);
        assert!(ClearanceLevel::L1 < ClearanceLevel::L2);
        assert_eq!(ClearanceLevel::L2.rank(), 2);
    }

    #[test]
    fn satisfies_is_rank_comparison() {
        assert!(ClearanceLevel::L2.satisfies(ClearanceLevel::L0));
        assert!(ClearanceLevel::L1.satisfies(ClearanceLevel::L1));
        assert!(!ClearanceLevel::L0.satisfies(ClearanceLevel::L2));
    }

    #[test]
    fn serde_uses_level_names() {
        let json = serde_json::to_string(&ClearanceLevel::L2).unwrap();
        assert_eq!(json, "\"L2\"");
        let back: ClearanceLevel = serde_json::from_str("\"L1\"").unwrap();
        assert_eq!(back, ClearanceLevel::L1);
    }
}

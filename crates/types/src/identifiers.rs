//! Domain-specific identifier types.

use crate::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Block identifier: the content fingerprint of a proposal.
pub type BlockId = Hash;

/// Validator identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorId(pub u64);

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validator({})", self.0)
    }
}

/// Logical round number. At most one block per view comes from an honest
/// proposer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct View(pub u64);

impl View {
    /// Genesis view.
    pub const GENESIS: Self = View(0);

    /// Get the next view.
    pub fn next(self) -> Self {
        View(self.0 + 1)
    }

    /// Get the previous view (returns None at genesis).
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(View)
    }

    /// True if `self` directly follows `other`.
    pub fn follows(self, other: View) -> bool {
        other.0.checked_add(1) == Some(self.0)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_next_prev() {
        let view = View(10);
        assert_eq!(view.next(), View(11));
        assert_eq!(view.prev(), Some(View(9)));

        assert_eq!(View::GENESIS.prev(), None);
        assert_eq!(View::GENESIS.next(), View(1));
    }

    #[test]
    fn test_view_follows() {
        assert!(View(4).follows(View(3)));
        assert!(!View(5).follows(View(3)));
        assert!(!View(3).follows(View(3)));
        assert!(!View(0).follows(View(u64::MAX)));
    }
}

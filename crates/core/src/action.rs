//! Action types for the forks state machine.

use forks_types::{BlockId, BlockProposal, QuorumCertificate, ValidatorId, View};
use std::sync::Arc;

/// Notifications produced while processing an event.
///
/// Actions are **commands** for the runner: forward finalized blocks to
/// execution and storage, surface equivocation evidence, update metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A proposal was admitted into the block tree.
    BlockIncorporated { block_id: BlockId, view: View },

    /// A proposal is waiting for its parent.
    BlockBuffered { block_id: BlockId, parent_id: BlockId },

    /// The locked QC advanced.
    LockAdvanced { qc: QuorumCertificate },

    /// A block became final.
    ///
    /// Emitted exactly once per block, ancestors before descendants, so the
    /// stream of these actions is an append-only log of committed history.
    BlockFinalized { block: Arc<BlockProposal> },

    /// Two distinct proposals from the same proposer at the same view.
    DoubleProposalDetected {
        view: View,
        proposer: ValidatorId,
        first: BlockId,
        second: BlockId,
    },
}

impl Action {
    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::BlockIncorporated { .. } => "BlockIncorporated",
            Action::BlockBuffered { .. } => "BlockBuffered",
            Action::LockAdvanced { .. } => "LockAdvanced",
            Action::BlockFinalized { .. } => "BlockFinalized",
            Action::DoubleProposalDetected { .. } => "DoubleProposalDetected",
        }
    }

    /// Check if this action reports finalized history.
    pub fn is_finalization(&self) -> bool {
        matches!(self, Action::BlockFinalized { .. })
    }
}

//! Errors reported by the forks core.
//!
//! Only caller-contract violations and construction mistakes surface here.
//! Stale, duplicate or not-yet-finalizing input is absorbed silently.

use forks_types::{BlockId, View};
use thiserror::Error;

/// Errors reported by the forks core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForksError {
    /// A block was handed to the tree before its parent.
    #[error("block {block_id} at {view} admitted before its parent {parent_id}")]
    MissingParent {
        block_id: BlockId,
        view: View,
        parent_id: BlockId,
    },

    /// The embedded QC does not certify the declared parent.
    #[error("block {block_id} carries a QC for {qc_block_id} at {qc_view}, not its parent")]
    QcParentMismatch {
        block_id: BlockId,
        qc_block_id: BlockId,
        qc_view: View,
    },

    /// A child's view does not exceed its parent's view.
    #[error("block {block_id} at {view} does not extend parent at {parent_view}")]
    NonIncreasingView {
        block_id: BlockId,
        view: View,
        parent_view: View,
    },

    /// A block referenced by id is not in the tree.
    #[error("unknown block {block_id}")]
    UnknownBlock { block_id: BlockId },

    /// A QC references a block the tree does not hold.
    #[error("QC at {view} references unknown block {block_id}")]
    UnknownQcBlock { block_id: BlockId, view: View },

    /// A finalization candidate does not descend from the finalized block.
    #[error("block {block_id} does not extend finalized block {finalized_id}")]
    FinalityConflict {
        block_id: BlockId,
        finalized_id: BlockId,
    },

    /// The pruning root does not sit at the pruning view.
    #[error("prune root {root_id} is at {root_view}, expected {view}")]
    PruneRootMismatch {
        root_id: BlockId,
        root_view: View,
        view: View,
    },

    /// The trusted root QC does not certify the root block.
    #[error("root QC for {qc_block_id} at {qc_view} does not certify root block {block_id}")]
    InvalidRoot {
        block_id: BlockId,
        qc_block_id: BlockId,
        qc_view: View,
    },

    /// No known QC is safe to extend at the requested view.
    #[error("no known safe QC to build a proposal for {view}")]
    NoSafeQc { view: View },

    /// A required component was not supplied to the reactor builder.
    #[error("reactor requires a {0}")]
    MissingComponent(&'static str),
}

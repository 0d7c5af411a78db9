//! Lock and finality rules over the block tree.
//!
//! # Two-chain rule
//!
//! For a newly incorporated block `B` with `P = parent(B.qc)` and
//! `G = parent(P.qc)`:
//!
//! ```text
//!   G  <--  P  <--  B        B.view == P.view + 1 == G.view + 2
//! ```
//!
//! - `B.qc` (certifying `P`) becomes the locked QC if its view is higher.
//! - `G` and every unfinalized ancestor of `G` become final, and `P.qc`
//!   (certifying `G`) becomes the finalized QC.
//!
//! Finalization prunes the tree so that `G` is the new root.

use crate::{BlockTree, ForksError};
use forks_core::Action;
use forks_types::{BlockId, BlockProposal, QuorumCertificate, View};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Owns the block tree together with the locked and finalized QCs.
#[derive(Debug)]
pub struct Finalizer {
    tree: BlockTree,

    /// Highest QC this replica is locked on. Never decreases.
    locked_qc: QuorumCertificate,

    /// QC certifying the latest finalized block (the tree root).
    finalized_qc: QuorumCertificate,
}

impl Finalizer {
    /// Create a finalizer from a trusted root and the QC certifying it.
    pub fn new(root: BlockProposal, root_qc: QuorumCertificate) -> Result<Self, ForksError> {
        if !root_qc.certifies(&root.block_id(), root.view()) {
            return Err(ForksError::InvalidRoot {
                block_id: root.block_id(),
                qc_block_id: root_qc.block_id,
                qc_view: root_qc.view,
            });
        }

        Ok(Self {
            tree: BlockTree::new(Arc::new(root)),
            locked_qc: root_qc.clone(),
            finalized_qc: root_qc,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// The block tree.
    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    /// The QC this replica is locked on.
    pub fn locked_qc(&self) -> &QuorumCertificate {
        &self.locked_qc
    }

    /// The QC certifying the latest finalized block.
    pub fn finalized_qc(&self) -> &QuorumCertificate {
        &self.finalized_qc
    }

    /// View of the latest finalized block.
    pub fn finalized_view(&self) -> View {
        self.finalized_qc.view
    }

    /// The latest finalized block.
    pub fn finalized_block(&self) -> &Arc<BlockProposal> {
        self.tree.root()
    }

    /// True if the block is neither known nor at or below the finalized view.
    pub fn is_processing_needed(&self, block_id: &BlockId, view: View) -> bool {
        view > self.finalized_view() && !self.tree.contains(block_id)
    }

    /// Record that a block's payload passed validation.
    pub fn mark_validated(&mut self, block_id: &BlockId) -> bool {
        self.tree.mark_validated(block_id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Incorporation
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a block whose parent is in the tree and apply the lock and
    /// finality rules.
    ///
    /// Stale and duplicate blocks produce no actions.
    #[instrument(level = "debug", skip(self, block), fields(
        block_id = ?block.block_id(),
        view = block.view().0,
    ))]
    pub fn add_block(&mut self, block: Arc<BlockProposal>) -> Result<Vec<Action>, ForksError> {
        if block.view() <= self.finalized_view() {
            trace!(
                finalized_view = self.finalized_view().0,
                "Ignoring block at or below finalized view"
            );
            return Ok(vec![]);
        }

        let block_id = block.block_id();
        let view = block.view();
        let proposer = block.proposer();
        let qc_view = block.qc().view;

        // Same proposer, same view, different content.
        let equivocations: Vec<BlockId> = self
            .tree
            .get_blocks_for_view(view)
            .into_iter()
            .filter(|other| other.proposer() == proposer && other.block_id() != block_id)
            .map(|other| other.block_id())
            .collect();

        if !self.tree.add_block(block)? {
            trace!("Block already incorporated");
            return Ok(vec![]);
        }

        debug!(qc_view = qc_view.0, "Block incorporated");
        let mut actions = vec![Action::BlockIncorporated { block_id, view }];

        for first in equivocations {
            warn!(
                view = view.0,
                proposer = proposer.0,
                first = ?first,
                second = ?block_id,
                "Double proposal detected"
            );
            actions.push(Action::DoubleProposalDetected {
                view,
                proposer,
                first,
                second: block_id,
            });
        }

        actions.extend(self.process_block(&block_id)?);
        Ok(actions)
    }

    /// Apply the two-chain rule with `block_id` as the newest block.
    pub fn process_block(&mut self, block_id: &BlockId) -> Result<Vec<Action>, ForksError> {
        let Some(block) = self.tree.block(block_id).cloned() else {
            return Err(ForksError::UnknownBlock {
                block_id: *block_id,
            });
        };

        let qc = block.qc();
        let Some(parent) = self.tree.block(&qc.block_id).cloned() else {
            return Err(ForksError::UnknownQcBlock {
                block_id: qc.block_id,
                view: qc.view,
            });
        };

        // The root's own QC may point below the pruned horizon.
        if parent.block_id() == self.tree.root_id() {
            return Ok(vec![]);
        }

        let parent_qc = parent.qc();
        let Some(grandparent) = self.tree.block(&parent_qc.block_id).cloned() else {
            return Err(ForksError::UnknownQcBlock {
                block_id: parent_qc.block_id,
                view: parent_qc.view,
            });
        };

        if !(block.view().follows(parent.view()) && parent.view().follows(grandparent.view())) {
            trace!(
                view = block.view().0,
                parent_view = parent.view().0,
                grandparent_view = grandparent.view().0,
                "No consecutive two-chain"
            );
            return Ok(vec![]);
        }

        let mut actions = Vec::new();

        if qc.view > self.locked_qc.view {
            debug!(
                old_locked_view = self.locked_qc.view.0,
                new_locked_view = qc.view.0,
                locked_block = ?qc.block_id,
                "Lock advanced"
            );
            self.locked_qc = qc.clone();
            actions.push(Action::LockAdvanced { qc: qc.clone() });
        }

        if grandparent.view() > self.finalized_view() {
            actions.extend(self.finalize(&grandparent, parent_qc.clone())?);
        }

        Ok(actions)
    }

    /// Finalize `target` and every unfinalized ancestor, then prune.
    fn finalize(
        &mut self,
        target: &Arc<BlockProposal>,
        qc: QuorumCertificate,
    ) -> Result<Vec<Action>, ForksError> {
        let root_id = self.tree.root_id();
        let root_view = self.tree.root().view();

        let mut newly_finalized = Vec::new();
        let mut cursor = target.clone();
        while cursor.block_id() != root_id {
            let next = match self.tree.block(&cursor.parent_id()) {
                Some(parent) if cursor.view() > root_view => parent.clone(),
                _ => {
                    return Err(ForksError::FinalityConflict {
                        block_id: target.block_id(),
                        finalized_id: root_id,
                    });
                }
            };
            newly_finalized.push(cursor);
            cursor = next;
        }
        newly_finalized.reverse();

        self.finalized_qc = qc;
        let removed = self.tree.prune_up_to(target.view(), target.block_id())?;

        let actions = newly_finalized
            .into_iter()
            .map(|block| {
                info!(
                    view = block.view().0,
                    block_id = ?block.block_id(),
                    proposer = block.proposer().0,
                    "Finalized block"
                );
                Action::BlockFinalized { block }
            })
            .collect();

        debug!(
            finalized_view = target.view().0,
            removed,
            tree_size = self.tree.len(),
            "Finality advanced"
        );
        Ok(actions)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Safety
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether an honest replica may vote for `block`.
    ///
    /// Requires a known parent certified by the block's QC, and that QC must
    /// itself pass [`Self::is_safe_qc`].
    pub fn is_safe_block(&self, block: &BlockProposal) -> bool {
        if block.view() <= self.finalized_view() {
            return false;
        }
        let Some(parent) = self.tree.block(&block.parent_id()) else {
            return false;
        };
        if !block.qc_matches_parent() || block.view() <= parent.view() {
            return false;
        }

        self.is_safe_qc(block.qc())
    }

    /// Whether a new proposal carrying `qc` would be safe.
    ///
    /// The certified block must extend the locked block, unless the QC is
    /// strictly newer than the lock. A QC at the lock view for any other
    /// block certifies an equivocating sibling and is never safe.
    pub fn is_safe_qc(&self, qc: &QuorumCertificate) -> bool {
        self.tree.is_known_block(&qc.block_id, qc.view)
            && (qc.view > self.locked_qc.view
                || self.tree.extends(&qc.block_id, &self.locked_qc.block_id))
    }
}

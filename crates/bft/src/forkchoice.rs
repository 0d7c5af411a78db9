//! Fork choice: which QC a new proposal should extend.

use crate::{Finalizer, ForksError};
use forks_types::{BlockId, BlockProposal, QuorumCertificate, View};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Strategy for picking the QC a proposal at a given view builds on.
///
/// The reactor feeds every incorporated block and every accepted QC through
/// [`ForkChoice::process_qc`]; the proposer then asks for a choice.
pub trait ForkChoice: Send + Sync {
    /// Record a QC as a candidate.
    fn process_qc(&mut self, qc: &QuorumCertificate);

    /// Record the QC embedded in an incorporated block.
    fn process_block(&mut self, block: &BlockProposal) {
        self.process_qc(block.qc());
    }

    /// Pick the QC a proposal at `view` should carry.
    fn make_fork_choice(
        &self,
        view: View,
        finalizer: &Finalizer,
    ) -> Result<QuorumCertificate, ForksError>;

    /// Forget candidates that can no longer be extended.
    fn on_finalized(&mut self, _finalized_view: View) {}

    /// Highest-view QC seen so far.
    fn highest_qc(&self) -> Option<&QuorumCertificate>;
}

/// Extends the newest safe QC.
///
/// Among candidates below the requested view, the highest view wins; ties
/// between equivocating QCs go to the smallest block id, so every replica
/// holding the same candidates makes the same choice.
#[derive(Debug, Default)]
pub struct NewestForkChoice {
    candidates: BTreeMap<View, BTreeMap<BlockId, QuorumCertificate>>,
}

impl NewestForkChoice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded candidates.
    pub fn len(&self) -> usize {
        self.candidates.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl ForkChoice for NewestForkChoice {
    fn process_qc(&mut self, qc: &QuorumCertificate) {
        let by_block = self.candidates.entry(qc.view).or_default();
        if !by_block.contains_key(&qc.block_id) {
            trace!(view = qc.view.0, block_id = ?qc.block_id, "New fork choice candidate");
            by_block.insert(qc.block_id, qc.clone());
        }
    }

    fn make_fork_choice(
        &self,
        view: View,
        finalizer: &Finalizer,
    ) -> Result<QuorumCertificate, ForksError> {
        let choice = self
            .candidates
            .range(..view)
            .rev()
            .flat_map(|(_, by_block)| by_block.values())
            .find(|qc| finalizer.is_safe_qc(qc));

        match choice {
            Some(qc) => {
                debug!(
                    view = view.0,
                    qc_view = qc.view.0,
                    block_id = ?qc.block_id,
                    "Fork choice"
                );
                Ok(qc.clone())
            }
            None => Err(ForksError::NoSafeQc { view }),
        }
    }

    fn on_finalized(&mut self, finalized_view: View) {
        self.candidates = self.candidates.split_off(&finalized_view);
    }

    fn highest_qc(&self) -> Option<&QuorumCertificate> {
        self.candidates
            .last_key_value()
            .and_then(|(_, by_block)| by_block.values().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forks_test_helpers::{chain, child_with_payload, genesis, qc_for};
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn setup(blocks: &[BlockProposal]) -> (Finalizer, NewestForkChoice) {
        let (root, root_qc) = genesis();
        let mut finalizer = Finalizer::new(root, root_qc.clone()).unwrap();
        let mut fork_choice = NewestForkChoice::new();
        fork_choice.process_qc(&root_qc);
        for block in blocks {
            finalizer.add_block(Arc::new(block.clone())).unwrap();
            fork_choice.process_block(block);
        }
        (finalizer, fork_choice)
    }

    #[traced_test]
    #[test]
    fn test_picks_newest_qc_below_view() {
        let (root, _) = genesis();
        let blocks = chain(&root, &[1, 3]);
        let (finalizer, mut fork_choice) = setup(&blocks);
        fork_choice.process_qc(&qc_for(&blocks[1]));

        let choice = fork_choice.make_fork_choice(View(4), &finalizer).unwrap();
        assert_eq!(choice, qc_for(&blocks[1]));

        // Candidates at or above the requested view are ignored.
        let choice = fork_choice.make_fork_choice(View(3), &finalizer).unwrap();
        assert_eq!(choice, qc_for(&blocks[0]));
    }

    #[traced_test]
    #[test]
    fn test_ties_go_to_smallest_block_id() {
        let (root, _) = genesis();
        let a = child_with_payload(&root, 1, b"a");
        let b = child_with_payload(&root, 1, b"b");
        let blocks = vec![a.clone(), b.clone()];
        let (finalizer, mut fork_choice) = setup(&blocks);

        fork_choice.process_qc(&qc_for(&b));
        fork_choice.process_qc(&qc_for(&a));

        let expected = if a.block_id() < b.block_id() { &a } else { &b };
        let choice = fork_choice.make_fork_choice(View(2), &finalizer).unwrap();
        assert_eq!(choice.block_id, expected.block_id());
        assert_eq!(fork_choice.highest_qc().map(|qc| qc.block_id), Some(expected.block_id()));
    }

    #[traced_test]
    #[test]
    fn test_skips_candidates_below_lock() {
        let (root, _) = genesis();
        let blocks = chain(&root, &[1, 2, 3]);
        let (finalizer, fork_choice) = setup(&blocks);
        assert_eq!(finalizer.locked_qc().view, View(2));

        // qc(1) is below the lock and the genesis QC points at a pruned block.
        let result = fork_choice.make_fork_choice(View(2), &finalizer);
        assert_eq!(result, Err(ForksError::NoSafeQc { view: View(2) }));

        let choice = fork_choice.make_fork_choice(View(4), &finalizer).unwrap();
        assert_eq!(choice, qc_for(&blocks[1]));
    }

    #[test]
    fn test_no_candidate_below_view() {
        let (finalizer, fork_choice) = setup(&[]);

        let result = fork_choice.make_fork_choice(View(0), &finalizer);
        assert_eq!(result, Err(ForksError::NoSafeQc { view: View(0) }));
    }

    #[test]
    fn test_on_finalized_drops_old_candidates() {
        let (root, _) = genesis();
        let blocks = chain(&root, &[1, 2, 3, 4]);
        let (_, mut fork_choice) = setup(&blocks);
        assert_eq!(fork_choice.len(), 4);

        fork_choice.on_finalized(View(2));
        assert_eq!(fork_choice.len(), 2);
        assert_eq!(fork_choice.highest_qc().map(|qc| qc.view), Some(View(3)));
    }
}

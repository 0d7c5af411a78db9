//! Reactor: the single entry point the node drives.
//!
//! Routes proposals through the pending buffer until their parent is
//! present, hands them to the finalizer, and keeps the fork choice fed.
//! All mutation goes through `&mut self`; the runner serializes calls.

use crate::{
    Finalizer, ForkChoice, ForksConfig, ForksError, NewestForkChoice, PendingBuffer,
};
use forks_core::{Action, Event, StateMachine};
use forks_types::{BlockId, BlockProposal, QuorumCertificate, View};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn, Span};

/// Counters and sizes for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForksStats {
    /// Blocks admitted into the tree.
    pub blocks_incorporated: u64,
    /// Blocks parked in the pending buffer.
    pub blocks_buffered: u64,
    /// Blocks finalized.
    pub blocks_finalized: u64,
    /// Equivocating proposals observed.
    pub double_proposals: u64,
    /// Current block tree size, root included.
    pub tree_size: usize,
    /// Current pending buffer size.
    pub pending_size: usize,
    pub finalized_view: View,
    pub locked_view: View,
}

/// Builder for [`Reactor`].
///
/// The finalizer and the fork choice are mandatory; the config defaults and
/// the span defaults to the caller's current span.
#[derive(Default)]
pub struct ReactorBuilder {
    finalizer: Option<Finalizer>,
    fork_choice: Option<Box<dyn ForkChoice>>,
    config: ForksConfig,
    span: Option<Span>,
}

impl ReactorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the finalizer (and with it the trusted root).
    pub fn finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// Set the fork choice strategy.
    pub fn fork_choice(mut self, fork_choice: Box<dyn ForkChoice>) -> Self {
        self.fork_choice = Some(fork_choice);
        self
    }

    pub fn config(mut self, config: ForksConfig) -> Self {
        self.config = config;
        self
    }

    /// Span every reactor log is recorded under.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Result<Reactor, ForksError> {
        let finalizer = self
            .finalizer
            .ok_or(ForksError::MissingComponent("finalizer"))?;
        let mut fork_choice = self
            .fork_choice
            .ok_or(ForksError::MissingComponent("fork choice"))?;

        fork_choice.process_qc(finalizer.finalized_qc());
        let pending = PendingBuffer::new(self.config.pending_capacity(), finalizer.finalized_view());

        Ok(Reactor {
            finalizer,
            fork_choice,
            pending,
            config: self.config,
            span: self.span.unwrap_or_else(Span::none),
            now: Duration::ZERO,
            counters: ForksStats::default(),
        })
    }
}

/// Facade over the block tree, pending buffer, finalizer and fork choice.
pub struct Reactor {
    finalizer: Finalizer,
    fork_choice: Box<dyn ForkChoice>,
    pending: PendingBuffer,
    config: ForksConfig,
    span: Span,
    now: Duration,
    counters: ForksStats,
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("finalized_view", &self.finalized_view())
            .field("locked_view", &self.finalizer.locked_qc().view)
            .field("tree_size", &self.finalizer.tree().len())
            .field("pending_size", &self.pending.len())
            .finish()
    }
}

impl Reactor {
    /// Reactor over a trusted root using [`NewestForkChoice`].
    pub fn new(
        root: BlockProposal,
        root_qc: QuorumCertificate,
        config: ForksConfig,
    ) -> Result<Self, ForksError> {
        ReactorBuilder::new()
            .finalizer(Finalizer::new(root, root_qc)?)
            .fork_choice(Box::new(NewestForkChoice::new()))
            .config(config)
            .build()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inputs
    // ═══════════════════════════════════════════════════════════════════════

    /// Accept a proposal in any order relative to its ancestors.
    ///
    /// Proposals with a known parent are admitted immediately, followed by
    /// every buffered descendant they unblock. Proposals with an unknown
    /// parent are buffered, unless that parent would sit at or below the
    /// finalized view.
    pub fn add_block(&mut self, block: BlockProposal) -> Result<Vec<Action>, ForksError> {
        let span = self.span.clone();
        let _guard = span.enter();

        let block = Arc::new(block);
        let block_id = block.block_id();
        if !self.is_processing_needed(&block_id, block.view()) {
            trace!(block_id = ?block_id, view = block.view().0, "Block needs no processing");
            return Ok(vec![]);
        }

        if self.finalizer.tree().contains(&block.parent_id()) {
            return self.admit_with_descendants(block);
        }

        if block.qc().view <= self.finalized_view() {
            debug!(
                block_id = ?block_id,
                view = block.view().0,
                qc_view = block.qc().view.0,
                finalized_view = self.finalized_view().0,
                "Dropping block that forks below the finalized view"
            );
            return Ok(vec![]);
        }

        let parent_id = block.parent_id();
        if !self.pending.add(block) {
            return Ok(vec![]);
        }
        self.counters.blocks_buffered += 1;
        debug!(
            block_id = ?block_id,
            parent_id = ?parent_id,
            pending = self.pending.len(),
            "Buffered block until parent arrives"
        );
        Ok(vec![Action::BlockBuffered {
            block_id,
            parent_id,
        }])
    }

    /// Admit `block`, then release buffered descendants breadth-first.
    fn admit_with_descendants(
        &mut self,
        block: Arc<BlockProposal>,
    ) -> Result<Vec<Action>, ForksError> {
        let mut actions = self.admit(block.clone())?;

        let mut queue = VecDeque::from([block.block_id()]);
        while let Some(parent_id) = queue.pop_front() {
            let Some(mut children) = self.pending.by_parent_id(&parent_id) else {
                continue;
            };
            self.pending.drop_for_parent(&parent_id);
            children.sort_by_key(|child| (child.view(), child.block_id()));

            for child in children {
                let child_id = child.block_id();
                if self.finalizer.tree().contains(&child_id) {
                    queue.push_back(child_id);
                    continue;
                }
                if !self.is_processing_needed(&child_id, child.view())
                    || !self.finalizer.tree().contains(&child.parent_id())
                {
                    trace!(block_id = ?child_id, "Released block no longer needed");
                    continue;
                }
                match self.admit(child) {
                    Ok(child_actions) => {
                        actions.extend(child_actions);
                        queue.push_back(child_id);
                    }
                    Err(err) => {
                        warn!(block_id = ?child_id, error = %err, "Discarding buffered block");
                    }
                }
            }
        }

        Ok(actions)
    }

    /// Incorporate a block whose parent is in the tree.
    fn admit(&mut self, block: Arc<BlockProposal>) -> Result<Vec<Action>, ForksError> {
        let actions = self.finalizer.add_block(block.clone())?;
        if actions.is_empty() {
            return Ok(actions);
        }
        self.fork_choice.process_block(&block);

        let mut finalized = false;
        for action in &actions {
            match action {
                Action::BlockIncorporated { .. } => self.counters.blocks_incorporated += 1,
                Action::BlockFinalized { .. } => {
                    self.counters.blocks_finalized += 1;
                    finalized = true;
                }
                Action::DoubleProposalDetected { .. } => self.counters.double_proposals += 1,
                Action::BlockBuffered { .. } | Action::LockAdvanced { .. } => {}
            }
        }

        if finalized {
            let view = self.finalized_view();
            let dropped = self.pending.prune_up_to(view);
            self.fork_choice.on_finalized(view);
            debug!(finalized_view = view.0, dropped, "Pruned pending buffer");
        }

        Ok(actions)
    }

    /// Accept a QC (typically formed by the vote aggregator).
    ///
    /// Stale QCs are ignored. A QC for a block this reactor never admitted
    /// is a caller error.
    pub fn add_qc(&mut self, qc: QuorumCertificate) -> Result<(), ForksError> {
        let span = self.span.clone();
        let _guard = span.enter();

        if qc.view <= self.finalized_view() {
            trace!(qc_view = qc.view.0, "Ignoring stale QC");
            return Ok(());
        }
        if !self.finalizer.tree().is_known_block(&qc.block_id, qc.view) {
            return Err(ForksError::UnknownQcBlock {
                block_id: qc.block_id,
                view: qc.view,
            });
        }

        trace!(qc_view = qc.view.0, block_id = ?qc.block_id, "Accepted QC");
        self.fork_choice.process_qc(&qc);
        Ok(())
    }

    /// Record that a block's payload passed validation.
    pub fn mark_validated(&mut self, block_id: &BlockId) -> bool {
        self.finalizer.mark_validated(block_id)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    pub fn get_block(&self, view: View, block_id: &BlockId) -> Option<&Arc<BlockProposal>> {
        self.finalizer.tree().get_block(view, block_id)
    }

    pub fn get_blocks_for_view(&self, view: View) -> Vec<&Arc<BlockProposal>> {
        self.finalizer.tree().get_blocks_for_view(view)
    }

    pub fn finalized_view(&self) -> View {
        self.finalizer.finalized_view()
    }

    pub fn finalized_block(&self) -> &Arc<BlockProposal> {
        self.finalizer.finalized_block()
    }

    pub fn finalized_qc(&self) -> &QuorumCertificate {
        self.finalizer.finalized_qc()
    }

    pub fn locked_qc(&self) -> &QuorumCertificate {
        self.finalizer.locked_qc()
    }

    /// Whether this replica may vote for `block`.
    pub fn is_safe_node(&self, block: &BlockProposal) -> bool {
        self.finalizer.is_safe_block(block)
    }

    pub fn is_known_block(&self, block_id: &BlockId, view: View) -> bool {
        self.finalizer.tree().is_known_block(block_id, view)
    }

    /// True unless the block is already in the tree, already buffered, or at
    /// or below the finalized view.
    pub fn is_processing_needed(&self, block_id: &BlockId, view: View) -> bool {
        self.finalizer.is_processing_needed(block_id, view) && !self.pending.contains(block_id)
    }

    /// QC a proposal at `view` should extend.
    pub fn make_fork_choice(&self, view: View) -> Result<QuorumCertificate, ForksError> {
        let span = self.span.clone();
        let _guard = span.enter();
        self.fork_choice.make_fork_choice(view, &self.finalizer)
    }

    pub fn config(&self) -> &ForksConfig {
        &self.config
    }

    pub fn stats(&self) -> ForksStats {
        ForksStats {
            tree_size: self.finalizer.tree().len(),
            pending_size: self.pending.len(),
            finalized_view: self.finalized_view(),
            locked_view: self.finalizer.locked_qc().view,
            ..self.counters
        }
    }
}

impl StateMachine for Reactor {
    type Error = ForksError;

    fn handle(&mut self, event: Event) -> Result<Vec<Action>, ForksError> {
        match event {
            Event::BlockProposalReceived { block } => self.add_block(block),
            Event::QuorumCertificateReceived { qc } => self.add_qc(qc).map(|()| vec![]),
            Event::BlockValidated { block_id } => {
                if !self.mark_validated(&block_id) {
                    trace!(block_id = ?block_id, "Validated block is not in the tree");
                }
                Ok(vec![])
            }
            Event::CleanupTimer => {
                let dropped = self.pending.prune_older_than(self.config.pending_max_age);
                if dropped > 0 {
                    let _guard = self.span.enter();
                    debug!(dropped, pending = self.pending.len(), "Dropped expired pending blocks");
                }
                Ok(vec![])
            }
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        self.pending.set_time(now);
    }

    fn now(&self) -> Duration {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forks_test_helpers::{chain, child, child_with_payload, genesis, qc_for};
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tracing_test::traced_test;

    fn make_reactor() -> (Reactor, BlockProposal) {
        let (root, root_qc) = genesis();
        let reactor = Reactor::new(root.clone(), root_qc, ForksConfig::default()).unwrap();
        (reactor, root)
    }

    fn finalized_ids(actions: &[Action]) -> Vec<BlockId> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::BlockFinalized { block } => Some(block.block_id()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_builder_requires_components() {
        let (root, root_qc) = genesis();

        let missing_finalizer = ReactorBuilder::new()
            .fork_choice(Box::new(NewestForkChoice::new()))
            .build();
        assert!(matches!(
            missing_finalizer,
            Err(ForksError::MissingComponent("finalizer"))
        ));

        let missing_fork_choice = ReactorBuilder::new()
            .finalizer(Finalizer::new(root, root_qc).unwrap())
            .build();
        assert!(matches!(
            missing_fork_choice,
            Err(ForksError::MissingComponent("fork choice"))
        ));
    }

    #[traced_test]
    #[test]
    fn test_builder_seeds_fork_choice_with_root() {
        let (reactor, root) = make_reactor();
        let choice = reactor.make_fork_choice(View(1)).unwrap();
        assert!(choice.certifies(&root.block_id(), View(0)));
    }

    #[traced_test]
    #[test]
    fn test_out_of_order_delivery_cascades() {
        let (mut reactor, root) = make_reactor();
        let blocks = chain(&root, &[1, 2, 3]);

        let actions = reactor.add_block(blocks[2].clone()).unwrap();
        assert_eq!(
            actions,
            vec![Action::BlockBuffered {
                block_id: blocks[2].block_id(),
                parent_id: blocks[1].block_id(),
            }]
        );
        reactor.add_block(blocks[1].clone()).unwrap();
        assert!(!reactor.is_processing_needed(&blocks[1].block_id(), View(2)));
        assert_eq!(reactor.stats().pending_size, 2);

        let actions = reactor.add_block(blocks[0].clone()).unwrap();
        let incorporated: Vec<View> = actions
            .iter()
            .filter_map(|action| match action {
                Action::BlockIncorporated { view, .. } => Some(*view),
                _ => None,
            })
            .collect();
        assert_eq!(incorporated, vec![View(1), View(2), View(3)]);
        assert_eq!(finalized_ids(&actions), vec![blocks[0].block_id()]);
        assert_eq!(reactor.finalized_view(), View(1));
        assert!(reactor.locked_qc().certifies(&blocks[1].block_id(), View(2)));
        assert_eq!(reactor.stats().pending_size, 0);
    }

    #[traced_test]
    #[test]
    fn test_block_forking_below_finality_is_dropped() {
        let (mut reactor, root) = make_reactor();
        let blocks = chain(&root, &[1, 2, 3, 4]);
        for block in &blocks {
            reactor.add_block(block.clone()).unwrap();
        }
        assert_eq!(reactor.finalized_view(), View(2));

        // Parent at view 1 on another branch was never seen and never will be.
        let orphan_parent = child_with_payload(&root, 1, b"orphan");
        let orphan = child(&orphan_parent, 5);
        assert!(reactor.add_block(orphan).unwrap().is_empty());
        assert_eq!(reactor.stats().pending_size, 0);
    }

    #[traced_test]
    #[test]
    fn test_add_qc() {
        let (mut reactor, root) = make_reactor();
        let blocks = chain(&root, &[1, 2]);
        reactor.add_block(blocks[0].clone()).unwrap();

        let unknown = reactor.add_qc(qc_for(&blocks[1]));
        assert_eq!(
            unknown,
            Err(ForksError::UnknownQcBlock {
                block_id: blocks[1].block_id(),
                view: View(2),
            })
        );

        reactor.add_qc(qc_for(&blocks[0])).unwrap();
        assert_eq!(reactor.make_fork_choice(View(2)).unwrap(), qc_for(&blocks[0]));

        // Stale QCs are a no-op.
        let (_, root_qc) = genesis();
        assert_eq!(reactor.add_qc(root_qc), Ok(()));
    }

    #[traced_test]
    #[test]
    fn test_safety_rejects_competing_fork() {
        let (mut reactor, root) = make_reactor();
        let blocks = chain(&root, &[1, 2, 3]);
        for block in &blocks {
            reactor.add_block(block.clone()).unwrap();
        }

        let competing = child(&blocks[0], 4);
        assert!(!reactor.is_safe_node(&competing));
        assert!(reactor.is_safe_node(&child(&blocks[2], 4)));
    }

    #[traced_test]
    #[test]
    fn test_handle_events() {
        let (mut reactor, root) = make_reactor();
        let blocks = chain(&root, &[1, 2]);

        reactor.set_time(Duration::from_secs(1));
        let actions = reactor
            .handle(Event::BlockProposalReceived {
                block: blocks[1].clone(),
            })
            .unwrap();
        assert_eq!(actions.len(), 1);

        reactor.set_time(Duration::from_secs(1) + reactor.config().pending_max_age);
        reactor.handle(Event::CleanupTimer).unwrap();
        assert_eq!(reactor.stats().pending_size, 1, "entry at the age bound survives");

        reactor.set_time(Duration::from_secs(2) + reactor.config().pending_max_age);
        reactor.handle(Event::CleanupTimer).unwrap();
        assert_eq!(reactor.stats().pending_size, 0);
        assert_eq!(reactor.now(), Duration::from_secs(2) + reactor.config().pending_max_age);

        reactor
            .handle(Event::BlockProposalReceived {
                block: blocks[0].clone(),
            })
            .unwrap();
        reactor
            .handle(Event::BlockValidated {
                block_id: blocks[0].block_id(),
            })
            .unwrap();
        assert!(reactor.finalizer.tree().is_validated(&blocks[0].block_id()));

        let err = reactor.handle(Event::QuorumCertificateReceived {
            qc: qc_for(&blocks[1]),
        });
        assert!(err.is_err());
    }

    #[traced_test]
    #[test]
    fn test_double_proposal_counted() {
        let (mut reactor, root) = make_reactor();
        reactor.add_block(child_with_payload(&root, 1, b"a")).unwrap();
        let actions = reactor.add_block(child_with_payload(&root, 1, b"b")).unwrap();

        assert!(actions
            .iter()
            .any(|action| matches!(action, Action::DoubleProposalDetected { .. })));
        let stats = reactor.stats();
        assert_eq!(stats.double_proposals, 1);
        assert_eq!(stats.blocks_incorporated, 2);
        assert_eq!(reactor.get_blocks_for_view(View(1)).len(), 2);
    }

    #[test]
    fn test_finality_is_independent_of_arrival_order() {
        let (root, _) = genesis();
        let blocks = chain(&root, &(1..=10).collect::<Vec<_>>());
        let fork = child_with_payload(&blocks[0], 2, b"fork");
        let fork_child = child(&fork, 4);

        let mut deliveries: Vec<BlockProposal> = blocks.clone();
        deliveries.extend(blocks.iter().cloned());
        deliveries.push(fork);
        deliveries.push(fork_child);

        let expected: Vec<BlockId> = blocks[..8].iter().map(|b| b.block_id()).collect();

        for seed in 0..25u64 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut order = deliveries.clone();
            order.shuffle(&mut rng);

            let (mut reactor, _) = make_reactor();
            let mut finalized = Vec::new();
            let mut last_view = View(0);
            for block in order {
                let actions = reactor.add_block(block).unwrap();
                for action in &actions {
                    if let Action::BlockFinalized { block } = action {
                        assert!(block.view() > last_view, "seed {seed}: finality regressed");
                        last_view = block.view();
                        finalized.push(block.block_id());
                    }
                }
            }

            assert_eq!(finalized, expected, "seed {seed}");
            assert_eq!(reactor.finalized_view(), View(8), "seed {seed}");
            assert!(reactor.locked_qc().certifies(&blocks[8].block_id(), View(9)));
            assert_eq!(
                reactor.make_fork_choice(View(11)).unwrap(),
                qc_for(&blocks[8]),
                "seed {seed}"
            );
        }
    }
}

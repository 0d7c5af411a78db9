//! Simulation runner.

use crate::{EventKey, NetworkConfig, NodeIndex, SimEvent, SimulatedNetwork};
use forks_bft::{ForksConfig, ForksError, Reactor};
use forks_core::{Action, Event, StateMachine};
use forks_types::{
    BlockId, BlockProposal, Hash, QuorumCertificate, SignerBitfield, ValidatorId, View,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Parameters of a simulated committee.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Committee size.
    pub num_nodes: u32,
    /// Fixed view length; the leader of view `v` proposes at `v * view_duration`.
    pub view_duration: Duration,
    /// Probability that a leader stays silent for its view.
    pub skip_rate: f64,
    /// Probability that a leader sends conflicting proposals to different replicas.
    pub equivocation_rate: f64,
    /// Views between pending-buffer cleanups.
    pub cleanup_every_views: u64,
    pub network: NetworkConfig,
    pub forks: ForksConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_nodes: 4,
            view_duration: Duration::from_millis(100),
            skip_rate: 0.0,
            equivocation_rate: 0.0,
            cleanup_every_views: 10,
            network: NetworkConfig::default(),
            forks: ForksConfig::default(),
        }
    }
}

/// Statistics collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub events_processed: u64,
    pub blocks_proposed: u64,
    pub views_skipped: u64,
    pub equivocations: u64,
    pub qcs_formed: u64,
    /// QCs that reached a replica before the block they certify.
    pub qcs_deferred: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub messages_duplicated: u64,
    /// Events a reactor reported as errors (e.g. a QC that outran its block).
    pub rejected_events: u64,
    pub double_proposals_detected: u64,
}

/// Finality disagreement between or within replicas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("node {node} finalized view {view} after view {previous}")]
    NonMonotonicFinality {
        node: NodeIndex,
        view: View,
        previous: View,
    },

    #[error("nodes {first} and {second} finalized different blocks at position {position}")]
    ConflictingFinality {
        first: NodeIndex,
        second: NodeIndex,
        position: usize,
    },
}

#[derive(Debug)]
struct SimNode {
    reactor: Reactor,
    /// Highest view this replica voted in; honest replicas vote once per view.
    last_voted_view: View,
    /// Every finalized block, in emission order.
    finalized: Vec<(View, BlockId)>,
    /// QCs waiting for their block, replayed once it is incorporated.
    deferred_qcs: HashMap<BlockId, QuorumCertificate>,
}

/// Deterministic multi-replica simulation.
pub struct SimulationRunner {
    config: SimulationConfig,
    network: SimulatedNetwork,
    nodes: Vec<SimNode>,
    queue: BTreeMap<EventKey, SimEvent>,
    sequence: u64,
    rng: ChaCha8Rng,
    now: Duration,
    votes: HashMap<BlockId, BTreeSet<NodeIndex>>,
    certified: HashSet<BlockId>,
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a committee sharing one genesis block.
    pub fn new(config: SimulationConfig, seed: u64) -> Result<Self, ForksError> {
        let (root, root_qc) =
            BlockProposal::root(View::GENESIS, ValidatorId(0), b"genesis".to_vec());

        let nodes = (0..config.num_nodes)
            .map(|index| -> Result<SimNode, ForksError> {
                let reactor = forks_bft::ReactorBuilder::new()
                    .finalizer(forks_bft::Finalizer::new(root.clone(), root_qc.clone())?)
                    .fork_choice(Box::new(forks_bft::NewestForkChoice::new()))
                    .config(config.forks.clone())
                    .span(tracing::debug_span!("node", index))
                    .build()?;
                Ok(SimNode {
                    reactor,
                    last_voted_view: View::GENESIS,
                    finalized: Vec::new(),
                    deferred_qcs: HashMap::new(),
                })
            })
            .collect::<Result<Vec<_>, ForksError>>()?;

        let mut runner = Self {
            network: SimulatedNetwork::new(config.network.clone()),
            config,
            nodes,
            queue: BTreeMap::new(),
            sequence: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            now: Duration::ZERO,
            votes: HashMap::new(),
            certified: HashSet::new(),
            stats: SimulationStats::default(),
        };

        let first_view = View(1);
        let leader = runner.leader(first_view);
        runner.schedule(
            leader,
            runner.config.view_duration,
            SimEvent::ViewTimer { view: first_view },
        );
        Ok(runner)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn num_nodes(&self) -> u32 {
        self.config.num_nodes
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Reactor> {
        self.nodes.get(index as usize).map(|node| &node.reactor)
    }

    /// Finalized blocks of a node, in finalization order.
    pub fn finalized_log(&self, index: NodeIndex) -> Option<&[(View, BlockId)]> {
        self.nodes
            .get(index as usize)
            .map(|node| node.finalized.as_slice())
    }

    pub fn finalized_view(&self, index: NodeIndex) -> Option<View> {
        self.node(index).map(Reactor::finalized_view)
    }

    /// Votes needed for a QC: `n - f` with `f = (n - 1) / 3`.
    pub fn quorum(&self) -> usize {
        let n = self.config.num_nodes as usize;
        n - n.saturating_sub(1) / 3
    }

    fn leader(&self, view: View) -> NodeIndex {
        (view.0 % u64::from(self.config.num_nodes.max(1))) as NodeIndex
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event loop
    // ═══════════════════════════════════════════════════════════════════════

    fn schedule(&mut self, node: NodeIndex, time: Duration, event: SimEvent) {
        let key = EventKey {
            time,
            priority: event.priority(),
            node,
            sequence: self.sequence,
        };
        self.sequence += 1;
        self.queue.insert(key, event);
    }

    /// Process every event scheduled at or before `end_time`.
    pub fn run_until(&mut self, end_time: Duration) {
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().time > end_time {
                break;
            }
            let (key, event) = entry.remove_entry();
            self.now = key.time;
            self.stats.events_processed += 1;

            match event {
                SimEvent::ViewTimer { view } => self.on_view_timer(view),
                SimEvent::Deliver { event } => self.deliver(key.node, event),
            }
        }
        self.now = self.now.max(end_time);
    }

    /// Run until the last view's proposal has had time to settle.
    pub fn run_views(&mut self, views: u64) {
        let settle = self.config.network.latency * 4;
        let end = self.config.view_duration * (views as u32) + settle;
        self.run_until(end);
    }

    fn on_view_timer(&mut self, view: View) {
        let next = view.next();
        let next_leader = self.leader(next);
        self.schedule(
            next_leader,
            self.now + self.config.view_duration,
            SimEvent::ViewTimer { view: next },
        );

        if self.config.cleanup_every_views > 0 && view.0 % self.config.cleanup_every_views == 0 {
            for node in 0..self.config.num_nodes {
                self.deliver(node, Event::CleanupTimer);
            }
        }

        let leader = self.leader(view);
        if self.rng.gen::<f64>() < self.config.skip_rate {
            debug!(view = view.0, leader, "Leader skips view");
            self.stats.views_skipped += 1;
            return;
        }

        let qc = match self.nodes[leader as usize].reactor.make_fork_choice(view) {
            Ok(qc) => qc,
            Err(err) => {
                warn!(view = view.0, leader, error = %err, "Leader cannot propose");
                self.stats.views_skipped += 1;
                return;
            }
        };

        let payload = format!("view-{}-leader-{}", view.0, leader).into_bytes();
        let block = BlockProposal::new(
            view,
            qc.block_id,
            qc.clone(),
            ValidatorId(u64::from(leader)),
            payload.clone(),
        );
        self.stats.blocks_proposed += 1;
        trace!(
            view = view.0,
            leader,
            qc_view = qc.view.0,
            block_id = ?block.block_id(),
            "Proposing"
        );

        if self.rng.gen::<f64>() < self.config.equivocation_rate {
            let mut twin_payload = payload;
            twin_payload.extend_from_slice(b"-twin");
            let twin = BlockProposal::new(
                view,
                qc.block_id,
                qc,
                ValidatorId(u64::from(leader)),
                twin_payload,
            );
            self.stats.equivocations += 1;
            debug!(view = view.0, leader, "Leader equivocates");

            let half = self.config.num_nodes / 2;
            for node in 0..self.config.num_nodes {
                let proposal = if node < half { block.clone() } else { twin.clone() };
                self.send(leader, node, Event::BlockProposalReceived { block: proposal });
            }
            // The last replica sees both.
            let last = self.config.num_nodes.saturating_sub(1);
            self.send(leader, last, Event::BlockProposalReceived { block });
            return;
        }

        for node in 0..self.config.num_nodes {
            self.send(
                leader,
                node,
                Event::BlockProposalReceived {
                    block: block.clone(),
                },
            );
        }
    }

    fn send(&mut self, from: NodeIndex, to: NodeIndex, event: Event) {
        self.stats.messages_sent += 1;
        let delays = self.network.delivery_delays(from, to, &mut self.rng);
        if delays.is_empty() {
            self.stats.messages_dropped += 1;
        }
        if delays.len() > 1 {
            self.stats.messages_duplicated += 1;
        }
        for delay in delays {
            self.schedule(to, self.now + delay, SimEvent::Deliver { event: event.clone() });
        }
    }

    fn deliver(&mut self, node: NodeIndex, event: Event) {
        let Some(sim_node) = self.nodes.get_mut(node as usize) else {
            return;
        };
        sim_node.reactor.set_time(self.now);

        let early_qc = match &event {
            Event::QuorumCertificateReceived { qc } => Some(qc.clone()),
            _ => None,
        };

        match sim_node.reactor.handle(event) {
            Ok(actions) => self.process_actions(node, actions),
            Err(ForksError::UnknownQcBlock { block_id, .. }) if early_qc.is_some() => {
                if let Some(qc) = early_qc {
                    self.stats.qcs_deferred += 1;
                    self.nodes[node as usize]
                        .deferred_qcs
                        .entry(block_id)
                        .or_insert(qc);
                }
            }
            Err(err) => {
                self.stats.rejected_events += 1;
                debug!(node, error = %err, "Event rejected");
            }
        }
    }

    fn process_actions(&mut self, node: NodeIndex, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::BlockIncorporated { block_id, view } => {
                    self.maybe_vote(node, block_id, view);
                    let deferred = self.nodes[node as usize].deferred_qcs.remove(&block_id);
                    if let Some(qc) = deferred {
                        self.deliver(node, Event::QuorumCertificateReceived { qc });
                    }
                }
                Action::BlockFinalized { block } => {
                    let sim_node = &mut self.nodes[node as usize];
                    sim_node.finalized.push((block.view(), block.block_id()));
                    sim_node
                        .deferred_qcs
                        .retain(|_, qc| qc.view > block.view());
                }
                Action::DoubleProposalDetected { .. } => {
                    self.stats.double_proposals_detected += 1;
                }
                Action::BlockBuffered { .. } | Action::LockAdvanced { .. } => {}
            }
        }
    }

    /// Vote for a newly incorporated block if it is safe and newer than the
    /// last vote; form and broadcast a QC once a quorum voted.
    fn maybe_vote(&mut self, node: NodeIndex, block_id: BlockId, view: View) {
        let sim_node = &mut self.nodes[node as usize];
        if view <= sim_node.last_voted_view {
            return;
        }
        let Some(block) = sim_node.reactor.get_block(view, &block_id).cloned() else {
            return;
        };
        if !sim_node.reactor.is_safe_node(&block) {
            trace!(node, view = view.0, "Refusing to vote for unsafe block");
            return;
        }
        sim_node.last_voted_view = view;

        let quorum = self.quorum();
        let voters = self.votes.entry(block_id).or_default();
        voters.insert(node);
        if voters.len() < quorum || !self.certified.insert(block_id) {
            return;
        }

        let mut signers = SignerBitfield::new(self.config.num_nodes as usize);
        for voter in voters.iter() {
            signers.set(*voter as usize);
        }
        let sig_data = Hash::from_parts(&[b"sim_qc:".as_slice(), block_id.as_bytes().as_slice()])
            .as_bytes()
            .to_vec();
        let qc = QuorumCertificate::new(view, block_id, signers, sig_data);
        self.stats.qcs_formed += 1;
        trace!(view = view.0, block_id = ?block_id, "QC formed");

        for target in 0..self.config.num_nodes {
            self.send(node, target, Event::QuorumCertificateReceived { qc: qc.clone() });
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Checks
    // ═══════════════════════════════════════════════════════════════════════

    /// Verify that every replica finalized a strictly increasing sequence and
    /// that all sequences agree on their common prefix.
    pub fn check_safety(&self) -> Result<(), SafetyViolation> {
        for (index, node) in self.nodes.iter().enumerate() {
            let mut previous = View::GENESIS;
            for (view, _) in &node.finalized {
                if *view <= previous {
                    return Err(SafetyViolation::NonMonotonicFinality {
                        node: index as NodeIndex,
                        view: *view,
                        previous,
                    });
                }
                previous = *view;
            }
        }

        for (first, a) in self.nodes.iter().enumerate() {
            for (second, b) in self.nodes.iter().enumerate().skip(first + 1) {
                let position = a
                    .finalized
                    .iter()
                    .zip(&b.finalized)
                    .position(|(x, y)| x != y);
                if let Some(position) = position {
                    return Err(SafetyViolation::ConflictingFinality {
                        first: first as NodeIndex,
                        second: second as NodeIndex,
                        position,
                    });
                }
            }
        }

        info!(
            nodes = self.nodes.len(),
            min_finalized = self.nodes.iter().map(|n| n.finalized.len()).min().unwrap_or(0),
            "Safety check passed"
        );
        Ok(())
    }
}

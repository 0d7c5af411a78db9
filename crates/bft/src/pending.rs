//! Buffer for proposals that arrived before their parent.

use forks_types::{BlockId, BlockProposal, View};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// A proposal waiting for its parent.
#[derive(Debug, Clone)]
pub struct PendingBlock {
    block: Arc<BlockProposal>,
    arrived_at: Duration,
}

impl PendingBlock {
    /// The buffered proposal.
    pub fn block(&self) -> &Arc<BlockProposal> {
        &self.block
    }

    /// When the proposal entered the buffer.
    pub fn arrived_at(&self) -> Duration {
        self.arrived_at
    }
}

/// Orphan proposals keyed by the parent they are waiting on.
///
/// Several entries may share a parent (siblings, or equivocating proposals
/// for the same view). Parent keys are kept in first-arrival order so that
/// eviction and iteration are deterministic.
#[derive(Debug)]
pub struct PendingBuffer {
    by_parent: IndexMap<BlockId, Vec<PendingBlock>>,

    /// Ids of every buffered proposal, for duplicate detection.
    buffered: HashSet<BlockId>,

    capacity: usize,

    /// Proposals at or below this view are never buffered.
    finalized_view: View,

    now: Duration,
}

impl PendingBuffer {
    /// Create an empty buffer holding at most `capacity` proposals.
    pub fn new(capacity: usize, finalized_view: View) -> Self {
        Self {
            by_parent: IndexMap::new(),
            buffered: HashSet::new(),
            capacity,
            finalized_view,
            now: Duration::ZERO,
        }
    }

    /// Set the current time used to stamp new entries.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Number of buffered proposals.
    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }

    /// Check if a proposal is buffered.
    pub fn contains(&self, block_id: &BlockId) -> bool {
        self.buffered.contains(block_id)
    }

    /// Buffer a proposal under its parent id.
    ///
    /// Returns false (and stores nothing) for proposals at or below the
    /// finalized view and for duplicates. When full, evicts one entry first.
    pub fn add(&mut self, block: Arc<BlockProposal>) -> bool {
        let block_id = block.block_id();
        if block.view() <= self.finalized_view {
            trace!(
                block_id = ?block_id,
                view = block.view().0,
                finalized_view = self.finalized_view.0,
                "Rejecting stale pending proposal"
            );
            return false;
        }
        if self.buffered.contains(&block_id) || self.capacity == 0 {
            return false;
        }
        if self.buffered.len() >= self.capacity {
            self.evict_one();
        }

        self.buffered.insert(block_id);
        self.by_parent
            .entry(block.parent_id())
            .or_default()
            .push(PendingBlock {
                block,
                arrived_at: self.now,
            });
        true
    }

    /// Evict the oldest-arrived entry of the parent-wait holding the lowest
    /// view (ties broken by parent id).
    fn evict_one(&mut self) {
        let victim = self
            .by_parent
            .iter()
            .filter_map(|(parent_id, entries)| {
                entries
                    .iter()
                    .map(|entry| entry.block.view())
                    .min()
                    .map(|view| (view, *parent_id))
            })
            .min();
        let Some((_, parent_id)) = victim else {
            return;
        };

        let Some(entries) = self.by_parent.get_mut(&parent_id) else {
            return;
        };
        let oldest = entries
            .iter()
            .enumerate()
            .min_by_key(|(index, entry)| (entry.arrived_at, *index))
            .map(|(index, _)| index);
        if let Some(index) = oldest {
            let evicted = entries.remove(index);
            self.buffered.remove(&evicted.block.block_id());
            debug!(
                block_id = ?evicted.block.block_id(),
                view = evicted.block.view().0,
                parent_id = ?parent_id,
                "Pending buffer full, evicted proposal"
            );
        }
        if entries.is_empty() {
            self.by_parent.shift_remove(&parent_id);
        }
    }

    /// All proposals waiting on a parent, in arrival order.
    pub fn by_parent_id(&self, parent_id: &BlockId) -> Option<Vec<Arc<BlockProposal>>> {
        self.by_parent
            .get(parent_id)
            .map(|entries| entries.iter().map(|entry| entry.block.clone()).collect())
    }

    /// Remove every proposal waiting on a parent.
    pub fn drop_for_parent(&mut self, parent_id: &BlockId) {
        if let Some(entries) = self.by_parent.shift_remove(parent_id) {
            for entry in entries {
                self.buffered.remove(&entry.block.block_id());
            }
        }
    }

    /// Drop everything at or below a newly finalized view and stop accepting it.
    ///
    /// Returns the number of dropped proposals.
    pub fn prune_up_to(&mut self, finalized_view: View) -> usize {
        if finalized_view <= self.finalized_view {
            return 0;
        }
        self.finalized_view = finalized_view;
        self.retain(|entry| entry.block.view() > finalized_view)
    }

    /// Drop proposals that have waited longer than `max_age`.
    ///
    /// Returns the number of dropped proposals.
    pub fn prune_older_than(&mut self, max_age: Duration) -> usize {
        let now = self.now;
        self.retain(|entry| now.saturating_sub(entry.arrived_at) <= max_age)
    }

    fn retain(&mut self, mut keep: impl FnMut(&PendingBlock) -> bool) -> usize {
        let before = self.buffered.len();
        let buffered = &mut self.buffered;
        self.by_parent.retain(|_, entries| {
            entries.retain(|entry| {
                let kept = keep(entry);
                if !kept {
                    buffered.remove(&entry.block.block_id());
                }
                kept
            });
            !entries.is_empty()
        });
        before - self.buffered.len()
    }
}

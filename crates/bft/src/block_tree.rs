//! In-memory tree of unfinalized block proposals.
//!
//! Blocks live in an arena keyed by id; parent and child links are ids, so
//! there are no ownership cycles and ancestry walks are a chain of map
//! lookups. The tree only grows from the root: a block is admitted only
//! once its parent is present, and pruning removes every branch that can
//! no longer be finalized.

use crate::ForksError;
use forks_types::{BlockId, BlockProposal, View};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// A proposal plus the links and flags derived from it.
#[derive(Debug, Clone)]
pub struct BlockNode {
    block: Arc<BlockProposal>,
    children: BTreeSet<BlockId>,
    is_validated: bool,
}

impl BlockNode {
    fn new(block: Arc<BlockProposal>) -> Self {
        Self {
            block,
            children: BTreeSet::new(),
            is_validated: false,
        }
    }

    /// The stored proposal.
    pub fn block(&self) -> &Arc<BlockProposal> {
        &self.block
    }

    /// Ids of known children.
    pub fn children(&self) -> &BTreeSet<BlockId> {
        &self.children
    }

    /// Whether the payload checker accepted this block.
    pub fn is_validated(&self) -> bool {
        self.is_validated
    }
}

/// Index of every known, not-yet-pruned proposal.
#[derive(Debug)]
pub struct BlockTree {
    /// Arena of nodes keyed by block id.
    nodes: HashMap<BlockId, BlockNode>,

    /// Block ids per view. More than one entry under equivocation.
    by_view: BTreeMap<View, Vec<BlockId>>,

    /// The finalized block every other node descends from.
    root: Arc<BlockProposal>,
}

impl BlockTree {
    /// Create a tree rooted at a trusted (finalized) block.
    pub fn new(root: Arc<BlockProposal>) -> Self {
        let root_id = root.block_id();
        let mut node = BlockNode::new(root.clone());
        node.is_validated = true;

        let mut nodes = HashMap::new();
        nodes.insert(root_id, node);
        let mut by_view = BTreeMap::new();
        by_view.insert(root.view(), vec![root_id]);

        Self {
            nodes,
            by_view,
            root,
        }
    }

    /// The current root (latest finalized block).
    pub fn root(&self) -> &Arc<BlockProposal> {
        &self.root
    }

    /// Id of the current root.
    pub fn root_id(&self) -> BlockId {
        self.root.block_id()
    }

    /// Number of blocks in the tree, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root is never removed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check if a block id is present.
    pub fn contains(&self, block_id: &BlockId) -> bool {
        self.nodes.contains_key(block_id)
    }

    /// Look up a node by id.
    pub fn node(&self, block_id: &BlockId) -> Option<&BlockNode> {
        self.nodes.get(block_id)
    }

    /// Look up a proposal by id.
    pub fn block(&self, block_id: &BlockId) -> Option<&Arc<BlockProposal>> {
        self.nodes.get(block_id).map(|node| &node.block)
    }

    /// Admit a proposal whose parent is already present.
    ///
    /// Returns `Ok(false)` if the block is already known. Fails fast if the
    /// parent is absent, if the embedded QC does not certify the parent, or
    /// if the view does not increase; buffering is the caller's job.
    pub fn add_block(&mut self, block: Arc<BlockProposal>) -> Result<bool, ForksError> {
        let block_id = block.block_id();
        if self.nodes.contains_key(&block_id) {
            return Ok(false);
        }

        let parent_id = block.parent_id();
        let Some(parent) = self.nodes.get_mut(&parent_id) else {
            return Err(ForksError::MissingParent {
                block_id,
                view: block.view(),
                parent_id,
            });
        };

        let parent_view = parent.block.view();
        if !block.qc().certifies(&parent_id, parent_view) {
            return Err(ForksError::QcParentMismatch {
                block_id,
                qc_block_id: block.qc().block_id,
                qc_view: block.qc().view,
            });
        }
        if block.view() <= parent_view {
            return Err(ForksError::NonIncreasingView {
                block_id,
                view: block.view(),
                parent_view,
            });
        }

        parent.children.insert(block_id);
        self.by_view.entry(block.view()).or_default().push(block_id);
        self.nodes.insert(block_id, BlockNode::new(block));

        Ok(true)
    }

    /// Get a block by view and id.
    pub fn get_block(&self, view: View, block_id: &BlockId) -> Option<&Arc<BlockProposal>> {
        self.block(block_id).filter(|block| block.view() == view)
    }

    /// All known blocks at a view, in arrival order.
    pub fn get_blocks_for_view(&self, view: View) -> Vec<&Arc<BlockProposal>> {
        self.by_view
            .get(&view)
            .map(|ids| ids.iter().filter_map(|id| self.block(id)).collect())
            .unwrap_or_default()
    }

    /// Check if a block with this id and view is present.
    pub fn is_known_block(&self, block_id: &BlockId, view: View) -> bool {
        self.get_block(view, block_id).is_some()
    }

    /// True if `ancestor` is `descendant` or lies on its parent chain.
    pub fn extends(&self, descendant: &BlockId, ancestor: &BlockId) -> bool {
        let Some(target) = self.nodes.get(ancestor) else {
            return false;
        };
        let target_view = target.block.view();

        let mut cursor = *descendant;
        loop {
            if cursor == *ancestor {
                return true;
            }
            let Some(node) = self.nodes.get(&cursor) else {
                return false;
            };
            if node.block.view() <= target_view {
                return false;
            }
            cursor = node.block.parent_id();
        }
    }

    /// Mark a block as having passed payload validation.
    ///
    /// Returns false if the block is unknown.
    pub fn mark_validated(&mut self, block_id: &BlockId) -> bool {
        match self.nodes.get_mut(block_id) {
            Some(node) => {
                node.is_validated = true;
                true
            }
            None => false,
        }
    }

    /// Whether a known block passed payload validation.
    pub fn is_validated(&self, block_id: &BlockId) -> bool {
        self.nodes.get(block_id).is_some_and(|node| node.is_validated)
    }

    /// Remove everything at or below `view` except `root_id`, which becomes
    /// the new root, and every block descending from a removed block.
    ///
    /// Returns the number of removed blocks. Calls at or below the current
    /// root view are no-ops.
    pub fn prune_up_to(&mut self, view: View, root_id: BlockId) -> Result<usize, ForksError> {
        if view <= self.root.view() {
            trace!(view = view.0, root_view = self.root.view().0, "Prune is a no-op");
            return Ok(0);
        }

        let Some(new_root) = self.nodes.get(&root_id).map(|node| node.block.clone()) else {
            return Err(ForksError::UnknownBlock { block_id: root_id });
        };
        if new_root.view() != view {
            return Err(ForksError::PruneRootMismatch {
                root_id,
                root_view: new_root.view(),
                view,
            });
        }

        let retained = self.by_view.split_off(&view.next());
        let pruned = std::mem::replace(&mut self.by_view, retained);

        let mut doomed: HashSet<BlockId> = pruned
            .into_values()
            .flatten()
            .filter(|id| *id != root_id)
            .collect();

        // Forks that branched off below the new root can never be finalized.
        let mut queue: VecDeque<BlockId> = doomed.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for child in &node.children {
                if *child != root_id && doomed.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }

        for id in &doomed {
            let Some(node) = self.nodes.remove(id) else {
                continue;
            };
            let block_view = node.block.view();
            if block_view > view {
                if let Some(ids) = self.by_view.get_mut(&block_view) {
                    ids.retain(|other| other != id);
                    if ids.is_empty() {
                        self.by_view.remove(&block_view);
                    }
                }
            }
        }

        self.by_view.insert(view, vec![root_id]);
        self.root = new_root;

        debug!(
            view = view.0,
            root = ?root_id,
            removed = doomed.len(),
            remaining = self.nodes.len(),
            "Pruned block tree"
        );

        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forks_test_helpers::{child, child_with_payload, genesis, qc_for};
    use forks_types::ValidatorId;

    fn make_tree() -> (BlockTree, Arc<BlockProposal>) {
        let (root, _) = genesis();
        let root = Arc::new(root);
        (BlockTree::new(root.clone()), root)
    }

    #[test]
    fn test_add_block_is_idempotent() {
        let (mut tree, root) = make_tree();
        let a = Arc::new(child(&root, 1));

        assert_eq!(tree.add_block(a.clone()), Ok(true));
        assert_eq!(tree.add_block(a.clone()), Ok(false));
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get_blocks_for_view(View(1)).len(), 1);
        assert!(tree.node(&root.block_id()).unwrap().children().contains(&a.block_id()));
    }

    #[test]
    fn test_add_block_without_parent_fails() {
        let (mut tree, root) = make_tree();
        let a = child(&root, 1);
        let b = Arc::new(child(&a, 2));

        let err = tree.add_block(b.clone()).unwrap_err();
        assert_eq!(
            err,
            ForksError::MissingParent {
                block_id: b.block_id(),
                view: View(2),
                parent_id: a.block_id(),
            }
        );
        assert!(!tree.contains(&b.block_id()));
    }

    #[test]
    fn test_add_block_rejects_qc_for_other_block() {
        let (mut tree, root) = make_tree();
        let a = Arc::new(child(&root, 1));
        tree.add_block(a.clone()).unwrap();

        // Claims `a` as parent but carries the root's QC.
        let bad = Arc::new(BlockProposal::new(
            View(2),
            a.block_id(),
            qc_for(&root),
            ValidatorId(2),
            vec![],
        ));
        assert!(matches!(
            tree.add_block(bad),
            Err(ForksError::QcParentMismatch { .. })
        ));
    }

    #[test]
    fn test_add_block_rejects_non_increasing_view() {
        let (mut tree, root) = make_tree();
        let a = Arc::new(child(&root, 3));
        tree.add_block(a.clone()).unwrap();

        let stale = Arc::new(child(&a, 3));
        assert!(matches!(
            tree.add_block(stale),
            Err(ForksError::NonIncreasingView { .. })
        ));
    }

    #[test]
    fn test_equivocating_blocks_are_both_stored() {
        let (mut tree, root) = make_tree();
        let a = Arc::new(child_with_payload(&root, 1, b"a"));
        let b = Arc::new(child_with_payload(&root, 1, b"b"));
        tree.add_block(a.clone()).unwrap();
        tree.add_block(b.clone()).unwrap();

        let at_view = tree.get_blocks_for_view(View(1));
        assert_eq!(at_view.len(), 2);
        assert!(tree.is_known_block(&a.block_id(), View(1)));
        assert!(tree.is_known_block(&b.block_id(), View(1)));
        assert!(!tree.is_known_block(&a.block_id(), View(2)));
        assert!(tree.get_block(View(1), &b.block_id()).is_some());
    }

    #[test]
    fn test_extends_follows_parent_chain() {
        let (mut tree, root) = make_tree();
        let a = Arc::new(child(&root, 1));
        let b = Arc::new(child(&a, 2));
        let fork = Arc::new(child_with_payload(&root, 2, b"fork"));
        for block in [&a, &b, &fork] {
            tree.add_block(block.clone()).unwrap();
        }

        assert!(tree.extends(&b.block_id(), &root.block_id()));
        assert!(tree.extends(&b.block_id(), &a.block_id()));
        assert!(tree.extends(&b.block_id(), &b.block_id()));
        assert!(!tree.extends(&a.block_id(), &b.block_id()));
        assert!(!tree.extends(&fork.block_id(), &a.block_id()));
    }

    #[test]
    fn test_mark_validated() {
        let (mut tree, root) = make_tree();
        let a = Arc::new(child(&root, 1));
        tree.add_block(a.clone()).unwrap();

        assert!(tree.is_validated(&root.block_id()));
        assert!(!tree.is_validated(&a.block_id()));
        assert!(tree.mark_validated(&a.block_id()));
        assert!(tree.is_validated(&a.block_id()));
        assert!(!tree.mark_validated(&child(&a, 2).block_id()));
    }

    #[test]
    fn test_prune_collapses_history_into_new_root() {
        let (mut tree, root) = make_tree();
        let a = Arc::new(child(&root, 1));
        let b = Arc::new(child(&a, 2));
        let c = Arc::new(child(&b, 3));
        // Fork off `a` that skips view 2; it can never be finalized once `b` is.
        let fork = Arc::new(child_with_payload(&a, 4, b"fork"));
        let fork_child = Arc::new(child(&fork, 5));
        for block in [&a, &b, &c, &fork, &fork_child] {
            tree.add_block(block.clone()).unwrap();
        }

        let removed = tree.prune_up_to(View(2), b.block_id()).unwrap();
        assert_eq!(removed, 4); // root, a, fork, fork_child

        assert_eq!(tree.root_id(), b.block_id());
        assert_eq!(tree.len(), 2);
        assert!(tree.get_blocks_for_view(View(0)).is_empty());
        assert!(tree.get_blocks_for_view(View(1)).is_empty());
        assert_eq!(tree.get_blocks_for_view(View(2)).len(), 1);
        assert!(tree.get_blocks_for_view(View(4)).is_empty());
        assert!(tree.contains(&c.block_id()));
        assert!(tree.extends(&c.block_id(), &b.block_id()));
    }

    #[test]
    fn test_prune_is_monotonic() {
        let (mut tree, root) = make_tree();
        let a = Arc::new(child(&root, 1));
        let b = Arc::new(child(&a, 2));
        tree.add_block(a.clone()).unwrap();
        tree.add_block(b.clone()).unwrap();

        tree.prune_up_to(View(2), b.block_id()).unwrap();
        assert_eq!(tree.prune_up_to(View(2), b.block_id()), Ok(0));
        assert_eq!(tree.prune_up_to(View(1), a.block_id()), Ok(0));
        assert_eq!(tree.root_id(), b.block_id());
    }

    #[test]
    fn test_prune_rejects_root_at_other_view() {
        let (mut tree, root) = make_tree();
        let a = Arc::new(child(&root, 1));
        tree.add_block(a.clone()).unwrap();

        assert!(matches!(
            tree.prune_up_to(View(2), a.block_id()),
            Err(ForksError::PruneRootMismatch { .. })
        ));
        assert_eq!(tree.root_id(), root.block_id());
    }
}

//! End-to-end behavior of the reactor through its public API.

use forks_bft::{Finalizer, ForksConfig, ForksError, Reactor, ReactorBuilder};
use forks_core::Action;
use forks_test_helpers::{chain, child_with_payload, genesis, qc_for};
use forks_types::{BlockProposal, View};
use tracing_test::traced_test;

fn reactor() -> (Reactor, BlockProposal) {
    let (root, root_qc) = genesis();
    let reactor = Reactor::new(root.clone(), root_qc, ForksConfig::default()).unwrap();
    (reactor, root)
}

fn finalized_views(actions: &[Action]) -> Vec<View> {
    actions
        .iter()
        .filter_map(|action| match action {
            Action::BlockFinalized { block } => Some(block.view()),
            _ => None,
        })
        .collect()
}

#[traced_test]
#[test]
fn test_two_chain_finalizes_grandparent() {
    let (mut reactor, root) = reactor();
    let blocks = chain(&root, &[1, 2, 3]);

    let mut finalized = Vec::new();
    for block in &blocks {
        finalized.extend(finalized_views(&reactor.add_block(block.clone()).unwrap()));
    }

    assert_eq!(finalized, vec![View(1)]);
    assert_eq!(reactor.finalized_view(), View(1));
    assert_eq!(reactor.finalized_block().block_id(), blocks[0].block_id());
    assert_eq!(reactor.locked_qc(), &qc_for(&blocks[1]));
    assert_eq!(reactor.finalized_qc(), &qc_for(&blocks[0]));
}

#[traced_test]
#[test]
fn test_view_gap_does_not_finalize() {
    let (mut reactor, root) = reactor();

    for block in chain(&root, &[1, 3, 4]) {
        let actions = reactor.add_block(block).unwrap();
        assert!(finalized_views(&actions).is_empty());
    }
    assert_eq!(reactor.finalized_view(), View(0));
}

#[traced_test]
#[test]
fn test_orphans_admitted_ancestors_first() {
    let (mut reactor, root) = reactor();
    let blocks = chain(&root, &[1, 2, 3]);

    for block in blocks.iter().skip(1).rev() {
        let actions = reactor.add_block(block.clone()).unwrap();
        assert!(matches!(actions.as_slice(), [Action::BlockBuffered { .. }]));
        assert!(reactor.get_block(block.view(), &block.block_id()).is_none());
    }

    let incorporated: Vec<View> = reactor
        .add_block(blocks[0].clone())
        .unwrap()
        .iter()
        .filter_map(|action| match action {
            Action::BlockIncorporated { view, .. } => Some(*view),
            _ => None,
        })
        .collect();
    assert_eq!(incorporated, vec![View(1), View(2), View(3)]);
    assert_eq!(reactor.finalized_view(), View(1));
}

#[traced_test]
#[test]
fn test_fork_choice_independent_of_qc_order() {
    let (root, _) = genesis();
    let base = chain(&root, &[1, 2]);
    let x = child_with_payload(&base[1], 3, b"x");
    let y = child_with_payload(&base[1], 3, b"y");

    let build = |qcs: [&BlockProposal; 2]| {
        let (mut reactor, _) = reactor();
        for block in base.iter().chain([&x, &y]) {
            reactor.add_block(block.clone()).unwrap();
        }
        for block in qcs {
            reactor.add_qc(qc_for(block)).unwrap();
        }
        reactor
    };

    let first = build([&x, &y]);
    let second = build([&y, &x]);

    let expected = if x.block_id() < y.block_id() {
        qc_for(&x)
    } else {
        qc_for(&y)
    };
    assert_eq!(first.make_fork_choice(View(4)).unwrap(), expected);
    assert_eq!(second.make_fork_choice(View(4)).unwrap(), expected);
}

#[traced_test]
#[test]
fn test_competing_block_rejected_after_lock() {
    let (mut reactor, root) = reactor();
    let blocks = chain(&root, &[1, 2, 3]);
    for block in &blocks {
        reactor.add_block(block.clone()).unwrap();
    }

    let rival = child_with_payload(&blocks[0], 2, b"rival");
    assert!(!reactor.is_safe_node(&rival));
    assert!(reactor.is_safe_node(&child_with_payload(&blocks[2], 4, b"next")));
}

#[traced_test]
#[test]
fn test_finalization_prunes_lower_views() {
    let (mut reactor, root) = reactor();
    let blocks = chain(&root, &[1, 2, 3, 4, 5]);
    for block in &blocks {
        reactor.add_block(block.clone()).unwrap();
    }

    assert_eq!(reactor.finalized_view(), View(3));
    assert!(reactor.get_blocks_for_view(View(0)).is_empty());
    assert!(reactor.get_blocks_for_view(View(1)).is_empty());
    assert!(reactor.get_blocks_for_view(View(2)).is_empty());
    assert_eq!(reactor.get_blocks_for_view(View(3)).len(), 1);
    assert!(!reactor.is_known_block(&blocks[0].block_id(), View(1)));
    assert!(!reactor.is_processing_needed(&blocks[1].block_id(), View(2)));
}

#[test]
fn test_builder_without_fork_choice_fails() {
    let (root, root_qc) = genesis();
    let result = ReactorBuilder::new()
        .finalizer(Finalizer::new(root, root_qc).unwrap())
        .build();
    assert!(matches!(
        result,
        Err(ForksError::MissingComponent("fork choice"))
    ));
}

#[traced_test]
#[test]
fn test_fork_choice_never_extends_sibling_of_lock() {
    for payload in [b"r0", b"r1", b"r2", b"r3", b"r4", b"r5"] {
        let (mut reactor, root) = reactor();
        let blocks = chain(&root, &[1, 2, 3]);
        for block in &blocks {
            reactor.add_block(block.clone()).unwrap();
        }
        let locked = &blocks[1];
        assert_eq!(reactor.locked_qc(), &qc_for(locked));

        let rival = child_with_payload(&blocks[0], 2, payload);
        reactor.add_block(rival.clone()).unwrap();
        reactor.add_qc(qc_for(&rival)).unwrap();
        reactor.add_qc(qc_for(locked)).unwrap();

        assert_eq!(reactor.make_fork_choice(View(3)).unwrap(), qc_for(locked));
        assert_eq!(reactor.make_fork_choice(View(4)).unwrap(), qc_for(locked));
        assert!(!reactor.is_safe_node(&child_with_payload(&rival, 4, b"on rival")));
        assert!(reactor.is_safe_node(&child_with_payload(locked, 4, b"on lock")));
    }
}

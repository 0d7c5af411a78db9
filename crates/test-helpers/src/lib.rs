//! Fixtures for forks-core tests.
//!
//! Builds well-formed proposal chains: every child carries a QC that
//! certifies its parent, signed by the whole fixed committee.

use forks_types::{BlockProposal, QuorumCertificate, SignerBitfield, ValidatorId, View};

/// Size of the fixture committee.
pub const COMMITTEE_SIZE: usize = 4;

/// Genesis block at view 0 and its bootstrap QC.
pub fn genesis() -> (BlockProposal, QuorumCertificate) {
    BlockProposal::root(View::GENESIS, ValidatorId(0), b"genesis".to_vec())
}

/// A QC certifying `block`, signed by every committee member.
pub fn qc_for(block: &BlockProposal) -> QuorumCertificate {
    let mut signers = SignerBitfield::new(COMMITTEE_SIZE);
    for index in 0..COMMITTEE_SIZE {
        signers.set(index);
    }
    QuorumCertificate::new(
        block.view(),
        block.block_id(),
        signers,
        block.block_id().as_bytes().to_vec(),
    )
}

/// A child of `parent` at `view`, proposed by the round-robin leader.
pub fn child(parent: &BlockProposal, view: u64) -> BlockProposal {
    child_with_payload(parent, view, &view.to_le_bytes())
}

/// Like [`child`] but with an explicit payload, for building siblings and
/// equivocating proposals.
pub fn child_with_payload(parent: &BlockProposal, view: u64, payload: &[u8]) -> BlockProposal {
    BlockProposal::new(
        View(view),
        parent.block_id(),
        qc_for(parent),
        ValidatorId(view % COMMITTEE_SIZE as u64),
        payload.to_vec(),
    )
}

/// A chain extending `parent`, one block per entry of `views`.
pub fn chain(parent: &BlockProposal, views: &[u64]) -> Vec<BlockProposal> {
    let mut blocks: Vec<BlockProposal> = Vec::with_capacity(views.len());
    for &view in views {
        let next = match blocks.last() {
            Some(tip) => child(tip, view),
            None => child(parent, view),
        };
        blocks.push(next);
    }
    blocks
}

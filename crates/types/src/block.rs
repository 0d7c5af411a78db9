//! Block proposal type.

use crate::{BlockId, Hash, QuorumCertificate, ValidatorId, View};
use serde::{Deserialize, Serialize};

/// A block proposal as handed to the forks core.
///
/// Immutable once created: the identifier is a Blake3 fingerprint over every
/// other field, so two proposals for the same `(view, proposer)` with
/// different contents have different ids (equivocation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProposal {
    block_id: BlockId,
    view: View,
    parent_id: BlockId,
    qc: QuorumCertificate,
    proposer: ValidatorId,
    payload: Vec<u8>,
}

impl BlockProposal {
    /// Create a proposal, computing its fingerprint.
    ///
    /// `qc` is expected to certify `parent_id`; the block tree rejects the
    /// proposal otherwise.
    pub fn new(
        view: View,
        parent_id: BlockId,
        qc: QuorumCertificate,
        proposer: ValidatorId,
        payload: Vec<u8>,
    ) -> Self {
        let block_id = Self::compute_id(view, &parent_id, &qc, proposer, &payload);
        Self {
            block_id,
            view,
            parent_id,
            qc,
            proposer,
            payload,
        }
    }

    /// Create a root block. Its QC certifies the block itself, which is how
    /// a trusted root (genesis or a previously finalized block) is bootstrapped.
    pub fn root(view: View, proposer: ValidatorId, payload: Vec<u8>) -> (Self, QuorumCertificate) {
        let placeholder = QuorumCertificate::root(view, Hash::ZERO);
        let block_id = Self::compute_id(view, &Hash::ZERO, &placeholder, proposer, &payload);
        let qc = QuorumCertificate::root(view, block_id);
        let block = Self {
            block_id,
            view,
            parent_id: Hash::ZERO,
            qc: qc.clone(),
            proposer,
            payload,
        };
        (block, qc)
    }

    fn compute_id(
        view: View,
        parent_id: &BlockId,
        qc: &QuorumCertificate,
        proposer: ValidatorId,
        payload: &[u8],
    ) -> BlockId {
        let payload_hash = Hash::from_bytes(payload);
        Hash::from_parts(&[
            b"block_proposal:",
            &view.0.to_le_bytes(),
            parent_id.as_bytes(),
            &qc.view.0.to_le_bytes(),
            qc.block_id.as_bytes(),
            &proposer.0.to_le_bytes(),
            payload_hash.as_bytes(),
        ])
    }

    /// Content fingerprint.
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// View this block was proposed in.
    pub fn view(&self) -> View {
        self.view
    }

    /// Identifier of the parent block.
    pub fn parent_id(&self) -> BlockId {
        self.parent_id
    }

    /// QC certifying the parent block.
    pub fn qc(&self) -> &QuorumCertificate {
        &self.qc
    }

    /// Validator that proposed this block.
    pub fn proposer(&self) -> ValidatorId {
        self.proposer
    }

    /// Opaque payload bytes (never executed by the forks core).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// True if the embedded QC certifies the declared parent.
    pub fn qc_matches_parent(&self) -> bool {
        self.qc.block_id == self.parent_id
    }

    /// Recompute the fingerprint and compare with the stored id.
    ///
    /// Proposals decoded from the wire go through this before admission.
    pub fn has_valid_id(&self) -> bool {
        if self.qc.block_id == self.block_id {
            // Root blocks certify themselves.
            let placeholder = QuorumCertificate::root(self.view, Hash::ZERO);
            return Self::compute_id(
                self.view,
                &self.parent_id,
                &placeholder,
                self.proposer,
                &self.payload,
            ) == self.block_id;
        }
        Self::compute_id(
            self.view,
            &self.parent_id,
            &self.qc,
            self.proposer,
            &self.payload,
        ) == self.block_id
    }
}

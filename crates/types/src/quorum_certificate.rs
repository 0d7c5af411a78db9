//! Quorum certificate type.

use crate::{BlockId, SignerBitfield, View};
use serde::{Deserialize, Serialize};

/// Proof that a quorum of replicas voted for `block_id` at `view`.
///
/// Signatures are checked by the verification layer before a QC reaches the
/// forks core; here a QC is treated as valid by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    /// View of the certified block.
    pub view: View,

    /// Certified block.
    pub block_id: BlockId,

    /// Which committee members contributed to the aggregate signature.
    pub signers: SignerBitfield,

    /// Opaque aggregated signature bytes.
    pub sig_data: Vec<u8>,
}

impl QuorumCertificate {
    /// Create a new quorum certificate.
    pub fn new(view: View, block_id: BlockId, signers: SignerBitfield, sig_data: Vec<u8>) -> Self {
        Self {
            view,
            block_id,
            signers,
            sig_data,
        }
    }

    /// QC for a trusted root block, supplied out-of-band at bootstrap.
    pub fn root(view: View, block_id: BlockId) -> Self {
        Self {
            view,
            block_id,
            signers: SignerBitfield::empty(),
            sig_data: Vec::new(),
        }
    }

    /// True if this QC certifies the given block at the given view.
    pub fn certifies(&self, block_id: &BlockId, view: View) -> bool {
        self.block_id == *block_id && self.view == view
    }

    /// Number of signers recorded in this certificate.
    pub fn signer_count(&self) -> usize {
        self.signers.count()
    }
}

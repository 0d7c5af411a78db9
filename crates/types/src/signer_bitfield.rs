//! Bitfield for tracking which validators have signed.

use serde::{Deserialize, Serialize};

/// A compact bitfield representing which validators have signed.
///
/// Carried by a QuorumCertificate to record the signers of its aggregated
/// signature. The forks core never inspects it beyond reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerBitfield {
    /// The bitfield bytes.
    bits: Vec<u8>,
    /// Number of validators (bits that are valid).
    num_validators: usize,
}

impl SignerBitfield {
    /// Create a new empty bitfield for the given number of validators.
    pub fn new(num_validators: usize) -> Self {
        let num_bytes = num_validators.div_ceil(8);
        Self {
            bits: vec![0u8; num_bytes],
            num_validators,
        }
    }

    /// Create an empty bitfield (for the root QC).
    pub fn empty() -> Self {
        Self {
            bits: Vec::new(),
            num_validators: 0,
        }
    }

    /// Mark a validator as having signed.
    pub fn set(&mut self, index: usize) {
        if index < self.num_validators {
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// Check if a bit is set.
    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.num_validators {
            return false;
        }
        self.bits
            .get(index / 8)
            .is_some_and(|byte| (byte >> (index % 8)) & 1 == 1)
    }

    /// Count the number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Get the number of validators this bitfield can represent.
    pub fn num_validators(&self) -> usize {
        self.num_validators
    }

    /// Get iterator over indices of set bits.
    pub fn set_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_validators).filter(|&i| self.is_set(i))
    }

    /// Check if the bitfield is empty (no bits set).
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }
}

impl Default for SignerBitfield {
    fn default() -> Self {
        Self::empty()
    }
}

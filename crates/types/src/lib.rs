//! Core types for the HotStuff forks core.
//!
//! This crate provides the foundational types used throughout the
//! implementation:
//!
//! - **Primitives**: Hash (Blake3 content fingerprints)
//! - **Identifiers**: BlockId, ValidatorId, View
//! - **Consensus types**: BlockProposal, QuorumCertificate, SignerBitfield
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod hash;
mod identifiers;

mod block;
mod quorum_certificate;
mod signer_bitfield;

pub use hash::{Hash, HexError};
pub use identifiers::{BlockId, ValidatorId, View};

pub use block::BlockProposal;
pub use quorum_certificate::QuorumCertificate;
pub use signer_bitfield::SignerBitfield;

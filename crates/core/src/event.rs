//! Event types for the forks state machine.

use forks_types::{BlockId, BlockProposal, QuorumCertificate};

/// Priority levels for event ordering within the same timestamp.
///
/// Lower values = higher priority (processed first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Timer events: scheduled by the runner itself.
    Timer = 0,

    /// Network events: already-authenticated inputs from the verification layer.
    Network = 1,
}

/// All possible events the forks core can receive.
///
/// Events are **passive data** - they describe something that happened.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// Periodic cleanup of stale pending proposals.
    CleanupTimer,

    // ═══════════════════════════════════════════════════════════════════════
    // Network (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// A block proposal passed upstream authentication.
    BlockProposalReceived { block: BlockProposal },

    /// A quorum certificate passed upstream signature verification.
    QuorumCertificateReceived { qc: QuorumCertificate },

    /// The payload checker accepted a block already in the tree.
    BlockValidated { block_id: BlockId },
}

impl Event {
    /// Get the priority for this event type.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::CleanupTimer => EventPriority::Timer,
            Event::BlockProposalReceived { .. }
            | Event::QuorumCertificateReceived { .. }
            | Event::BlockValidated { .. } => EventPriority::Network,
        }
    }

    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::CleanupTimer => "CleanupTimer",
            Event::BlockProposalReceived { .. } => "BlockProposalReceived",
            Event::QuorumCertificateReceived { .. } => "QuorumCertificateReceived",
            Event::BlockValidated { .. } => "BlockValidated",
        }
    }
}

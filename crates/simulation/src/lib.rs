//! Deterministic simulation runner.
//!
//! Runs several replicas of the forks core in one process over a simulated
//! network. Given the same seed, it produces identical results every run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  SimulationRunner                       │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Event Queue (BTreeMap<EventKey, SimEvent>)     │ │
//! │  │     Ordered by: time, priority, node, sequence     │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     nodes: one Reactor per replica                 │ │
//! │  │     Leaders propose via make_fork_choice           │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Actions → votes, QCs, finality logs            │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The network reorders (jitter), duplicates and drops messages. Votes are
//! aggregated centrally: a QC forms once a quorum of replicas found a block
//! safe, and is then broadcast like any other message.

mod event_queue;
mod network;
mod runner;

pub use event_queue::{EventKey, SimEvent};
pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{SafetyViolation, SimulationConfig, SimulationRunner, SimulationStats};

/// Type alias for deterministic node indexing in simulation.
pub type NodeIndex = u32;

//! Ordered event queue keys.

use crate::NodeIndex;
use forks_core::{Event, EventPriority};
use forks_types::View;
use std::time::Duration;

/// Total order over scheduled events.
///
/// Ties on time are broken by priority, then node, then insertion sequence,
/// so the queue drains identically on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub node: NodeIndex,
    pub sequence: u64,
}

/// Something scheduled to happen at a node.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// Start of a view; the leader proposes.
    ViewTimer { view: View },

    /// A message arrives at the node.
    Deliver { event: Event },
}

impl SimEvent {
    pub fn priority(&self) -> EventPriority {
        match self {
            SimEvent::ViewTimer { .. } => EventPriority::Timer,
            SimEvent::Deliver { event } => event.priority(),
        }
    }
}

//! Chained-HotStuff forks core.
//!
//! This crate keeps the tree of competing forks and decides, for a single
//! replica, what is safe to vote for, what a new proposal should extend,
//! and what is irreversibly final. It is synchronous and performs no I/O.
//!
//! # Architecture
//!
//! ```text
//!   proposals ──► Reactor ──► PendingBuffer (parent unknown)
//!                    │
//!                    ▼
//!                Finalizer ──► BlockTree
//!                    │
//!                    ▼
//!                ForkChoice
//! ```
//!
//! - [`Reactor`] is the only entry point; it also implements
//!   [`forks_core::StateMachine`] so a runner can drive it with events.
//! - [`Finalizer`] applies the two-chain lock and finality rules and prunes.
//! - [`ForkChoice`] picks the QC a new proposal extends.
//!
//! Finalized blocks are reported as `Action::BlockFinalized`, ancestors first.

mod block_tree;
mod config;
mod error;
mod finalizer;
mod forkchoice;
mod pending;
mod reactor;

pub use block_tree::{BlockNode, BlockTree};
pub use config::ForksConfig;
pub use error::ForksError;
pub use finalizer::Finalizer;
pub use forkchoice::{ForkChoice, NewestForkChoice};
pub use pending::{PendingBlock, PendingBuffer};
pub use reactor::{ForksStats, Reactor, ReactorBuilder};

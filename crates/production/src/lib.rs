//! Async runner for the forks core.
//!
//! Wraps a [`forks_bft::Reactor`] in a single tokio event loop:
//!
//! - Inputs arrive as [`forks_core::Event`]s on an ordered channel.
//! - One task owns all mutation; readers go through a cloneable
//!   [`ForksHandle`] backed by a `parking_lot::RwLock`.
//! - A cleanup tick drives `Event::CleanupTimer`.
//! - Produced [`forks_core::Action`]s are forwarded to an outbound channel.

mod config;
mod runner;
mod telemetry;

pub use config::{ConfigError, ForksSection, GenesisSection, LoggingSection, RunnerConfig, RunnerSection};
pub use runner::{ForksHandle, ForksRunner, ForksRunnerBuilder, RunnerError, ShutdownHandle};
pub use telemetry::{init_logging, TelemetryError};

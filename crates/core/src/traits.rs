//! Core traits for state machines.

use crate::{Action, Event};
use std::time::Duration;

/// A state machine that processes events.
///
/// - **Synchronous**: No async, no `.await`
/// - **Deterministic**: Same state + event = same actions
/// - **Pure-ish**: Mutates self, but performs no I/O
///
/// Unlike a pure event sink, `handle` can fail: an error means the caller
/// broke the admission contract (e.g. a QC for a block it never delivered),
/// which the state machine reports rather than repairs.
///
/// # Example
///
/// ```ignore
/// impl StateMachine for Reactor {
///     type Error = ForksError;
///
///     fn handle(&mut self, event: Event) -> Result<Vec<Action>, ForksError> {
///         match event {
///             Event::BlockProposalReceived { block } => self.add_block(block),
///             Event::QuorumCertificateReceived { qc } => self.add_qc(qc).map(|_| vec![]),
///             // ... etc
///         }
///     }
/// }
/// ```
pub trait StateMachine {
    /// Error reported for caller-contract violations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Process an event, returning actions to perform.
    ///
    /// # Guarantees
    ///
    /// - **Synchronous**: This method never blocks or awaits
    /// - **Deterministic**: Given the same state and event, always returns the same actions
    /// - **No I/O**: All I/O is performed by the runner via the returned actions
    fn handle(&mut self, event: Event) -> Result<Vec<Action>, Self::Error>;

    /// Set the current time.
    ///
    /// Called by the runner before each `handle()` call to provide the
    /// current simulation or wall-clock time.
    fn set_time(&mut self, now: Duration);

    /// Get the current time.
    ///
    /// Returns the time that was last set via `set_time()`.
    fn now(&self) -> Duration;
}

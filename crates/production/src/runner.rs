//! Production runner implementation.

use forks_bft::{ForksError, ForksStats, Reactor};
use forks_core::{Action, Event, StateMachine};
use forks_types::{BlockId, BlockProposal, QuorumCertificate, View};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, span, warn, Level};

/// Errors from the production runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Event channel closed")]
    ChannelClosed,
    #[error("Runner requires a reactor")]
    MissingReactor,
    #[error("Runner stopped before answering")]
    NoReply,
    #[error("Forks error: {0}")]
    Forks(#[from] ForksError),
}

/// An event queued for the event loop, optionally awaiting its outcome.
struct Submission {
    event: Event,
    reply: Option<oneshot::Sender<Result<(), ForksError>>>,
}

/// Handle for shutting down a running [`ForksRunner`].
///
/// When dropped, signals the runner to exit gracefully.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Trigger shutdown (consumes the handle).
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Cloneable access to a running reactor.
///
/// Inputs are queued onto the runner's event channel; queries take a read
/// lock and never wait on the event loop.
#[derive(Clone)]
pub struct ForksHandle {
    reactor: Arc<RwLock<Reactor>>,
    event_tx: mpsc::Sender<Submission>,
}

impl ForksHandle {
    /// Queue an event for the event loop without waiting for it.
    ///
    /// A rejection is only logged by the runner.
    pub async fn submit(&self, event: Event) -> Result<(), RunnerError> {
        self.event_tx
            .send(Submission { event, reply: None })
            .await
            .map_err(|_| RunnerError::ChannelClosed)
    }

    /// Queue an event and wait until the reactor handled it.
    ///
    /// Returns [`RunnerError::Forks`] if the reactor rejected the event.
    pub async fn submit_and_confirm(&self, event: Event) -> Result<(), RunnerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.event_tx
            .send(Submission {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| RunnerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RunnerError::NoReply)??;
        Ok(())
    }

    pub async fn submit_block(&self, block: BlockProposal) -> Result<(), RunnerError> {
        self.submit_and_confirm(Event::BlockProposalReceived { block })
            .await
    }

    pub async fn submit_qc(&self, qc: QuorumCertificate) -> Result<(), RunnerError> {
        self.submit_and_confirm(Event::QuorumCertificateReceived { qc })
            .await
    }

    pub fn finalized_view(&self) -> View {
        self.reactor.read().finalized_view()
    }

    pub fn finalized_block(&self) -> Arc<BlockProposal> {
        self.reactor.read().finalized_block().clone()
    }

    pub fn get_block(&self, view: View, block_id: &BlockId) -> Option<Arc<BlockProposal>> {
        self.reactor.read().get_block(view, block_id).cloned()
    }

    pub fn is_safe_node(&self, block: &BlockProposal) -> bool {
        self.reactor.read().is_safe_node(block)
    }

    pub fn make_fork_choice(&self, view: View) -> Result<QuorumCertificate, ForksError> {
        self.reactor.read().make_fork_choice(view)
    }

    pub fn stats(&self) -> ForksStats {
        self.reactor.read().stats()
    }
}

/// Builder for constructing a [`ForksRunner`].
///
/// Required fields:
/// - `reactor` - The forks core to drive
///
/// Optional fields:
/// - `channel_capacity` - Event channel capacity (defaults to 10,000)
/// - `cleanup_interval` - Time between cleanup ticks (defaults to 5s)
pub struct ForksRunnerBuilder {
    reactor: Option<Reactor>,
    channel_capacity: usize,
    cleanup_interval: Duration,
}

impl Default for ForksRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ForksRunnerBuilder {
    pub fn new() -> Self {
        Self {
            reactor: None,
            channel_capacity: 10_000,
            cleanup_interval: Duration::from_secs(5),
        }
    }

    pub fn reactor(mut self, reactor: Reactor) -> Self {
        self.reactor = Some(reactor);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn build(self) -> Result<ForksRunner, RunnerError> {
        let reactor = self.reactor.ok_or(RunnerError::MissingReactor)?;
        let (event_tx, event_rx) = mpsc::channel(self.channel_capacity.max(1));
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        Ok(ForksRunner {
            reactor: Arc::new(RwLock::new(reactor)),
            event_tx: Some(event_tx),
            event_rx,
            action_tx,
            action_rx: Some(action_rx),
            cleanup_interval: self.cleanup_interval,
            shutdown_rx,
            shutdown_tx: Some(shutdown_tx),
            start_time: Instant::now(),
        })
    }
}

/// Drives a [`Reactor`] from a single tokio task.
pub struct ForksRunner {
    reactor: Arc<RwLock<Reactor>>,
    /// Dropped when the loop starts so the channel closes with the last handle.
    event_tx: Option<mpsc::Sender<Submission>>,
    event_rx: mpsc::Receiver<Submission>,
    action_tx: mpsc::UnboundedSender<Action>,
    action_rx: Option<mpsc::UnboundedReceiver<Action>>,
    cleanup_interval: Duration,
    shutdown_rx: oneshot::Receiver<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    start_time: Instant,
}

impl ForksRunner {
    pub fn builder() -> ForksRunnerBuilder {
        ForksRunnerBuilder::new()
    }

    /// A handle for submitting events and querying state.
    pub fn handle(&self) -> Option<ForksHandle> {
        self.event_tx.as_ref().map(|event_tx| ForksHandle {
            reactor: self.reactor.clone(),
            event_tx: event_tx.clone(),
        })
    }

    /// Take the outbound action stream.
    ///
    /// Actions are discarded if this is never taken.
    pub fn take_actions(&mut self) -> Option<mpsc::UnboundedReceiver<Action>> {
        self.action_rx.take()
    }

    /// Take the shutdown handle.
    ///
    /// Returns a handle that when dropped triggers graceful shutdown.
    pub fn shutdown_handle(&mut self) -> Option<ShutdownHandle> {
        self.shutdown_tx
            .take()
            .map(|tx| ShutdownHandle { tx: Some(tx) })
    }

    /// Run the event loop until shutdown or until every handle is dropped.
    pub async fn run(mut self) -> Result<(), RunnerError> {
        drop(self.event_tx.take());
        drop(self.action_rx.take());

        info!(
            cleanup_interval_ms = self.cleanup_interval.as_millis() as u64,
            finalized_view = self.reactor.read().finalized_view().0,
            "Starting forks runner"
        );

        let mut cleanup_tick = tokio::time::interval(self.cleanup_interval);
        cleanup_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        cleanup_tick.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = cleanup_tick.tick() => {
                    self.dispatch(Event::CleanupTimer, None);
                }

                submission = self.event_rx.recv() => {
                    match submission {
                        Some(Submission { event, reply }) => self.dispatch(event, reply),
                        None => {
                            info!("All handles dropped, stopping");
                            break;
                        }
                    }
                }
            }
        }

        let stats = self.reactor.read().stats();
        info!(
            finalized_view = stats.finalized_view.0,
            blocks_finalized = stats.blocks_finalized,
            tree_size = stats.tree_size,
            pending_size = stats.pending_size,
            "Forks runner stopped"
        );
        Ok(())
    }

    fn dispatch(&self, event: Event, reply: Option<oneshot::Sender<Result<(), ForksError>>>) {
        let event_type = event.type_name();
        let event_span = span!(Level::DEBUG, "handle_event", event.type = %event_type);
        let _event_guard = event_span.enter();

        let result = {
            let mut reactor = self.reactor.write();
            reactor.set_time(self.start_time.elapsed());
            reactor.handle(event)
        };

        let outcome = match result {
            Ok(actions) => {
                for action in actions {
                    if action.is_finalization() {
                        info!(action = action.type_name(), "Emitting action");
                    } else {
                        debug!(action = action.type_name(), "Emitting action");
                    }
                    // Nobody listening is fine.
                    let _ = self.action_tx.send(action);
                }
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Rejected event");
                Err(err)
            }
        };

        if let Some(reply) = reply {
            // The submitter may have stopped waiting.
            let _ = reply.send(outcome);
        }
    }
}

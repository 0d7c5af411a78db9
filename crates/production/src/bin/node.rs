//! Forks Node
//!
//! Runs the forks core over a stream of already-authenticated inputs and
//! prints every finalized block as a JSON line.
//!
//! # Usage
//!
//! ```bash
//! # Read inputs from stdin with default settings
//! forks-node < inputs.jsonl
//!
//! # Start with configuration file and an input file
//! forks-node --config node.toml --input inputs.jsonl
//! ```
//!
//! # Input
//!
//! One JSON object per line, tagged by `kind`:
//!
//! ```text
//! {"kind":"block", "block_id":"..", "view":3, "parent_id":"..", "qc":{..}, "proposer":1, "payload":[..]}
//! {"kind":"qc", "view":3, "block_id":"..", "signers":{..}, "sig_data":[..]}
//! ```
//!
//! # Configuration
//!
//! See `RunnerConfig` for all configuration options.

use anyhow::{Context, Result};
use clap::Parser;
use forks_bft::{Finalizer, NewestForkChoice, ReactorBuilder};
use forks_core::Action;
use forks_production::{init_logging, ForksHandle, ForksRunner, RunnerConfig, RunnerError};
use forks_types::{BlockProposal, QuorumCertificate, ValidatorId, View};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, info_span, warn};

/// Forks Node
///
/// Feeds blocks and QCs into the forks core and reports finality.
#[derive(Parser, Debug)]
#[command(name = "forks-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines input file (defaults to stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Cleanup tick interval in milliseconds (overrides config)
    #[arg(long)]
    cleanup_interval_ms: Option<u64>,

    /// Log level filter (overrides config, RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,
}

/// One line of input.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum InputRecord {
    Block(BlockProposal),
    Qc(QuorumCertificate),
}

fn apply_overrides(config: &mut RunnerConfig, cli: &Cli) {
    if let Some(interval) = cli.cleanup_interval_ms {
        config.runner.cleanup_interval_ms = interval;
    }

    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
}

async fn feed_input(handle: &ForksHandle, input: Option<&Path>) -> Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let record: InputRecord = serde_json::from_str(line)
            .with_context(|| format!("Invalid input record on line {line_number}"))?;
        let outcome = match record {
            InputRecord::Block(block) => {
                if !block.has_valid_id() || !block.qc_matches_parent() {
                    warn!(line = line_number, block_id = ?block.block_id(), "Skipping malformed block");
                    continue;
                }
                handle.submit_block(block).await
            }
            InputRecord::Qc(qc) => handle.submit_qc(qc).await,
        };

        match outcome {
            Ok(()) => {}
            Err(RunnerError::Forks(err)) => {
                warn!(line = line_number, error = %err, "Input rejected");
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(lines = line_number, "Input exhausted");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    init_logging(&config.logging.level)?;
    info!("Forks node starting...");

    let (root, root_qc) = BlockProposal::root(
        View(config.genesis.view),
        ValidatorId(config.genesis.proposer),
        config.genesis.payload.clone().into_bytes(),
    );
    info!(
        root = ?root.block_id(),
        view = root.view().0,
        "Trusted root initialized"
    );

    let reactor = ReactorBuilder::new()
        .finalizer(Finalizer::new(root, root_qc)?)
        .fork_choice(Box::new(NewestForkChoice::new()))
        .config(config.forks_config())
        .span(info_span!("forks"))
        .build()?;

    let mut runner = ForksRunner::builder()
        .reactor(reactor)
        .channel_capacity(config.runner.channel_capacity)
        .cleanup_interval(config.cleanup_interval())
        .build()?;

    let handle = runner.handle().context("Runner handle unavailable")?;
    let mut actions = runner.take_actions().context("Action stream unavailable")?;
    let shutdown = runner.shutdown_handle();
    let runner_task = tokio::spawn(runner.run());

    let printer = tokio::spawn(async move {
        while let Some(action) = actions.recv().await {
            if let Action::BlockFinalized { block } = action {
                println!(
                    "{}",
                    serde_json::json!({
                        "view": block.view().0,
                        "block_id": block.block_id().to_hex(),
                        "proposer": block.proposer().0,
                    })
                );
            }
        }
    });

    let interrupted = tokio::select! {
        result = feed_input(&handle, cli.input.as_deref()) => {
            result?;
            false
        }
        _ = signal::ctrl_c() => {
            info!("Interrupted");
            true
        }
    };

    drop(handle);
    if interrupted {
        if let Some(shutdown) = shutdown {
            shutdown.shutdown();
        }
    }

    runner_task.await??;
    printer.await?;
    Ok(())
}

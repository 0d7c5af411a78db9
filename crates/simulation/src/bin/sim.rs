//! Forks Simulator CLI
//!
//! Runs a committee of replicas over a simulated network and checks that
//! their finalized chains agree.

use anyhow::{bail, Result};
use clap::Parser;
use forks_simulation::{NetworkConfig, SimulationConfig, SimulationRunner};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "forks-sim")]
#[command(about = "Deterministic simulation of the forks core")]
#[command(version)]
struct Cli {
    /// RNG seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Committee size
    #[arg(short, long, default_value = "4")]
    nodes: u32,

    /// Number of views to run
    #[arg(long, default_value = "100")]
    views: u64,

    /// View length in milliseconds
    #[arg(long, default_value = "100")]
    view_ms: u64,

    /// Base one-way latency in milliseconds
    #[arg(long, default_value = "10")]
    latency_ms: u64,

    /// Latency jitter as a fraction of the base latency
    #[arg(long, default_value = "0.5")]
    jitter: f64,

    /// Packet loss rate (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    loss: f64,

    /// Message duplication rate (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    duplicate: f64,

    /// Probability that a leader skips its view
    #[arg(long, default_value = "0.0")]
    skip: f64,

    /// Probability that a leader equivocates
    #[arg(long, default_value = "0.0")]
    equivocation: f64,

    /// Log filter (RUST_LOG wins when set)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.nodes == 0 {
        bail!("Committee must have at least one node");
    }

    let config = SimulationConfig {
        num_nodes: cli.nodes,
        view_duration: Duration::from_millis(cli.view_ms),
        skip_rate: cli.skip,
        equivocation_rate: cli.equivocation,
        network: NetworkConfig {
            latency: Duration::from_millis(cli.latency_ms),
            jitter_fraction: cli.jitter,
            packet_loss_rate: cli.loss,
            duplicate_rate: cli.duplicate,
        },
        ..Default::default()
    };

    let mut runner = SimulationRunner::new(config, cli.seed)?;
    runner.run_views(cli.views);

    let stats = runner.stats();
    println!("Simulation finished (seed {}, {} views)", cli.seed, cli.views);
    println!("  events processed:   {}", stats.events_processed);
    println!("  blocks proposed:    {}", stats.blocks_proposed);
    println!("  views skipped:      {}", stats.views_skipped);
    println!("  equivocations:      {}", stats.equivocations);
    println!("  double proposals:   {}", stats.double_proposals_detected);
    println!("  QCs formed:         {}", stats.qcs_formed);
    println!(
        "  messages:           {} sent, {} dropped, {} duplicated",
        stats.messages_sent, stats.messages_dropped, stats.messages_duplicated
    );
    println!("  rejected events:    {}", stats.rejected_events);
    for node in 0..runner.num_nodes() {
        let finalized = runner.finalized_log(node).map_or(0, <[_]>::len);
        println!(
            "  node {node}: finalized view {}, {finalized} blocks",
            runner.finalized_view(node).map_or(0, |view| view.0)
        );
    }

    if let Err(violation) = runner.check_safety() {
        bail!("Safety violation: {violation}");
    }
    println!("Safety check passed");
    Ok(())
}

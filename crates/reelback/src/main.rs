//! rbk - Reelback session replay engine CLI
//!
//! Subcommands:
//! - `rbk check-config` - Resolve options and print the canonical config
//! - `rbk simulate` - Drive the engine with a synthetic activity stream

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use reelback_core::config::ReplayOptions;
use reelback_core::container::{ContainerStatus, ReplayContainer};
use reelback_core::frame::{RecordingFrame, category};
use reelback_core::logging::{LogConfig, LogFormat, init_logging};
use reelback_core::registry::InstanceRegistry;
use reelback_core::session_store::{MemorySessionStore, SessionStore};
use reelback_core::transport::{ScriptedSender, SendOutcome, SentRecord};

#[derive(Parser)]
#[command(name = "rbk")]
#[command(about = "Session replay buffering and delivery engine")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log format (pretty or json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve options and print the canonical configuration as JSON
    CheckConfig {
        /// Path to a TOML options file (built-in defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Drive the engine with a synthetic activity stream and print a summary
    Simulate {
        /// Path to a TOML options file (built-in defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seed for the sampling draw (omit for an OS seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Number of synthetic frames to feed
        #[arg(long, default_value = "200")]
        events: usize,

        /// Gap between consecutive synthetic frames, ms
        #[arg(long, default_value = "250")]
        activity_gap_ms: u64,

        /// Script the first N deliveries to fail retryably
        #[arg(long, default_value = "0")]
        fail_sends: usize,

        /// Fire an error trigger after feeding this frame index
        #[arg(long)]
        error_at: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
        file: None,
    })?;

    match cli.command {
        Commands::CheckConfig { config } => check_config(config.as_deref()),
        Commands::Simulate {
            config,
            seed,
            events,
            activity_gap_ms,
            fail_sends,
            error_at,
        } => {
            simulate(SimulateArgs {
                config: config.as_deref(),
                seed,
                events,
                activity_gap_ms,
                fail_sends,
                error_at,
            })
            .await
        }
    }
}

fn load_options(path: Option<&Path>) -> Result<ReplayOptions> {
    match path {
        Some(path) => ReplayOptions::from_path(path)
            .with_context(|| format!("failed to load options from {}", path.display())),
        None => Ok(ReplayOptions::default()),
    }
}

fn check_config(path: Option<&Path>) -> Result<()> {
    let config = load_options(path)?.resolve()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

struct SimulateArgs<'a> {
    config: Option<&'a Path>,
    seed: Option<u64>,
    events: usize,
    activity_gap_ms: u64,
    fail_sends: usize,
    error_at: Option<usize>,
}

#[derive(Serialize)]
struct SimulateSummary {
    events_fed: usize,
    clock_ms: u64,
    deliveries: Vec<SentRecord>,
    status: ContainerStatus,
}

/// Ticks allowed for outstanding debounce/retry/suspension windows to run
/// down after the stream ends. Each tick jumps straight to the next
/// deadline, so even a retry chain settles in a handful of iterations.
const MAX_DRAIN_TICKS: usize = 64;

async fn simulate(args: SimulateArgs<'_>) -> Result<()> {
    let config = load_options(args.config)?.resolve()?;
    let registry = InstanceRegistry::new();
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let sender = ScriptedSender::new();
    let deliveries = sender.clone();
    for _ in 0..args.fail_sends {
        sender.enqueue(SendOutcome::RetryableFailure);
    }

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut container = ReplayContainer::with_rng(config, store, sender, &registry, rng, 0)?;

    let mut clock_ms = 0;
    for i in 0..args.events {
        clock_ms = i as u64 * args.activity_gap_ms;
        container.record_frame(synthetic_frame(i, clock_ms), clock_ms);
        if args.error_at == Some(i) {
            container.trigger_error_flush(clock_ms);
        }
        container.tick(clock_ms).await;
    }

    for _ in 0..MAX_DRAIN_TICKS {
        let Some(deadline) = container.next_deadline_ms() else {
            break;
        };
        clock_ms = deadline.max(clock_ms);
        container.tick(clock_ms).await;
    }
    container.stop(clock_ms).await;

    let summary = SimulateSummary {
        events_fed: args.events,
        clock_ms,
        deliveries: deliveries.sent(),
        status: container.status(),
    };
    info!(
        deliveries = summary.deliveries.len(),
        segments_sent = summary.status.stats.segments_sent,
        "Simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Synthetic stream shape: a user click every tenth frame keeps the session
/// active, a moderate mutation burst lands on every seventh, and the rest
/// are plain DOM snapshots.
fn synthetic_frame(index: usize, timestamp_ms: u64) -> RecordingFrame {
    if index % 10 == 0 {
        RecordingFrame::breadcrumb(timestamp_ms, category::UI_CLICK)
    } else if index % 7 == 3 {
        RecordingFrame::dom_with_mutations(
            timestamp_ms,
            25,
            json!({ "source": "synthetic", "seq": index }),
        )
    } else {
        RecordingFrame::dom(timestamp_ms, json!({ "source": "synthetic", "seq": index }))
    }
}

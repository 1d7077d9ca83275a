//! relay-daemon: run a bus hub, or a peer that joins one.
//!
//! Peers elect one leader to drive the data source; every peer prints
//! what the leader produces.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_core::{Coordinator, CoordinatorConfig, PeerHooks, PeerIdentity};
use relay_daemon::{BusHub, DataSource, SourceKind, WsBus};

#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(about = "Leader-elected message relay over a shared bus")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bus hub that peers connect to
    Hub {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:9470")]
        listen: String,
    },
    /// Run a peer
    Peer {
        /// Hub URL
        #[arg(long, default_value = "ws://127.0.0.1:9470")]
        hub: String,

        /// Data source driven while leading
        #[arg(long, value_enum, default_value_t = SourceKind::Ticker)]
        source: SourceKind,

        /// Ticker interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        tick_ms: u64,

        /// Heartbeat interval in milliseconds (overrides RELAY_HEARTBEAT_MS)
        #[arg(long)]
        heartbeat_ms: Option<u64>,

        /// Leadership decision timeout in milliseconds (overrides RELAY_DECISION_MS)
        #[arg(long)]
        decision_ms: Option<u64>,

        /// Peer identifier (generated if not provided)
        #[arg(long)]
        peer_id: Option<PeerIdentity>,
    },
}

async fn run_hub(listen: &str) -> Result<()> {
    let listener = BusHub::bind(listen).await?;
    info!("Hub running. Press Ctrl+C to stop.");

    BusHub::new()
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await;
    Ok(())
}

struct PeerOptions {
    hub: String,
    source: SourceKind,
    tick_ms: u64,
    heartbeat_ms: Option<u64>,
    decision_ms: Option<u64>,
    peer_id: Option<PeerIdentity>,
}

async fn run_peer(options: PeerOptions) -> Result<()> {
    let mut config = CoordinatorConfig::from_env()?;
    if let Some(ms) = options.heartbeat_ms {
        config.heartbeat_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = options.decision_ms {
        config.decision_timeout = Duration::from_millis(ms);
    }
    config.validate()?;

    let bus = WsBus::connect(&options.hub).await?.with_capacity(config.max_message_len);
    let flushed = bus.flushed();

    let mut source = DataSource::new(options.source, Duration::from_millis(options.tick_ms));
    let hooks = PeerHooks::new(
        move |deliver| source.start(deliver),
        |message| println!("{}", message),
    );

    let mut coordinator = Coordinator::new(bus, config);
    if let Some(identity) = options.peer_id {
        coordinator = coordinator.with_identity(identity);
    }
    let handle = coordinator.init(hooks);
    let mut status = handle.watch();

    info!("Peer running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    info!("Peer stopped");
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(
                    "Peer {} is {:?} (term {}, {} follower(s))",
                    current.identity, current.state, current.term, current.followers
                );
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                handle.shutdown().await?;
                break;
            }
        }
    }

    // Let the handoff or leave frame reach the hub
    if tokio::time::timeout(Duration::from_secs(2), flushed).await.is_err() {
        info!("Timed out flushing bus writes");
    }
    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,relay_core=debug,relay_daemon=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::Hub { listen } => run_hub(&listen).await,
        Command::Peer {
            hub,
            source,
            tick_ms,
            heartbeat_ms,
            decision_ms,
            peer_id,
        } => {
            run_peer(PeerOptions {
                hub,
                source,
                tick_ms,
                heartbeat_ms,
                decision_ms,
                peer_id,
            })
            .await
        }
    }
}

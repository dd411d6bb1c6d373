//! Stakechain CLI application

use anyhow::Context;
use clap::{Parser, Subcommand};
use stakechain::crypto::{KeyPair, KeyType};
use stakechain::periodic::PeriodicTask;
use stakechain::{PeerAddress, StakechainNode, DEFAULT_GOSSIP_INTERVAL_MS, DEFAULT_STATUS_INTERVAL_MS};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "stakechain-cli")]
#[command(about = "A minimal proof-of-stake node with gossip peer discovery")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Start(StartArgs),
    /// Generate a new keypair and print its public key
    Keygen {
        /// ed25519 or secp256k1
        #[arg(short, long, default_value = "ed25519")]
        key_type: KeyType,
    },
    /// Show version information
    Version,
}

#[derive(clap::Args)]
struct StartArgs {
    /// Host to bind and announce
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 for any free port)
    #[arg(short, long, default_value_t = stakechain::DEFAULT_PORT)]
    port: u16,

    /// Bootstrap peer as host:port; repeatable
    #[arg(long = "peer")]
    peers: Vec<PeerAddress>,

    /// Gossip refresh interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_GOSSIP_INTERVAL_MS)]
    gossip_interval_ms: u64,

    /// Status report interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_STATUS_INTERVAL_MS)]
    status_interval_ms: u64,

    /// Wallet key type
    #[arg(short, long, default_value = "ed25519")]
    key_type: KeyType,

    /// Forge a block from the pool on this interval
    #[arg(long)]
    forge_interval_ms: Option<u64>,
}

impl Default for StartArgs {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: stakechain::DEFAULT_PORT,
            peers: Vec::new(),
            gossip_interval_ms: DEFAULT_GOSSIP_INTERVAL_MS,
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
            key_type: KeyType::default(),
            forge_interval_ms: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Some(Commands::Start(args)) => run_node(args).await?,
        None => run_node(StartArgs::default()).await?,
        Some(Commands::Keygen { key_type }) => {
            let key_pair = KeyPair::generate(key_type);
            println!("Generated new {} keypair", key_type.as_str());
            println!("Public key: {}", key_pair.export_public());
        },
        Some(Commands::Version) => {
            println!("{} v{}", stakechain::NAME, stakechain::VERSION);
            println!("{}", stakechain::DESCRIPTION);
        },
    }

    Ok(())
}

async fn run_node(args: StartArgs) -> anyhow::Result<()> {
    let mut node = StakechainNode::builder()
        .host(args.host)
        .port(args.port)
        .bootstrap_peers(args.peers)
        .gossip_interval(Duration::from_millis(args.gossip_interval_ms))
        .status_interval(Duration::from_millis(args.status_interval_ms))
        .key_type(args.key_type)
        .build()
        .context("invalid node configuration")?;

    node.start().await.context("failed to start node")?;
    info!("Wallet {}", node.public_key());

    let forger = args.forge_interval_ms.map(|ms| {
        let state = node.state().clone();
        PeriodicTask::spawn("forge", Duration::from_millis(ms), CancellationToken::new(), move || {
            let state = state.clone();
            async move {
                if let Err(e) = state.forge_block().await {
                    warn!("Forging failed: {}", e);
                }
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("Shutting down node...");
    if let Some(forger) = forger {
        forger.stop().await;
    }
    node.stop().await?;
    Ok(())
}

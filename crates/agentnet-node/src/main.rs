//! agentnet-node: one agent on the AgentNet gossip network.
//!
//! Startup sequence:
//!   1. Load config and the agent key (generated on first run)
//!   2. Start the libp2p transport on the agent's own Ed25519 identity
//!   3. Wire the responder and reward settlement backends
//!   4. Start the network session (listen, subscribe, announce, dial seeds)
//!   5. Run the operator console until `quit` or Ctrl-C; without console
//!      input the node keeps running until Ctrl-C

mod config;
mod console;
mod keyfile;
mod responder;
mod settlement;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use agentnet_crypto::Signer;
use agentnet_p2p::{NetworkFacade, P2pNetwork, Responder, TokenTransfer};

use crate::config::{NodeConfig, ResponderConfig, SettlementConfig};
use crate::console::ConsoleExit;
use crate::responder::{ChatResponder, EchoResponder};
use crate::settlement::{DryRunTransfer, RpcTokenTransfer};

#[derive(Parser, Debug)]
#[command(
    name = "agentnet-node",
    version,
    about = "AgentNet node: gossip discovery, signed questions and answers, pay-per-answer rewards"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Cmd>,

    /// Path to the node config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Agent key file; created if missing.
    #[arg(long, default_value = "~/.agentnet/key.json")]
    key_file: PathBuf,

    /// P2P listen port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Seed peer multiaddresses (comma-separated, added to config).
    #[arg(long, value_delimiter = ',')]
    seeds: Vec<String>,

    /// Display name carried in announcements (overrides config).
    #[arg(long)]
    name: Option<String>,

    /// Default reward for `ask` (overrides config).
    #[arg(long)]
    reward: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a new agent key and print its id.
    Keygen {
        #[arg(long)]
        out: PathBuf,
        /// Overwrite an existing key file.
        #[arg(long)]
        force: bool,
    },
    /// Print the agent id stored in a key file.
    Id {
        #[arg(long)]
        key_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,agentnet=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Some(command) = &args.command {
        return run_command(command);
    }
    run_node(args).await
}

fn run_command(command: &Cmd) -> anyhow::Result<()> {
    let keypair = match command {
        Cmd::Keygen { out, force } => keyfile::generate(&keyfile::expand_tilde(out), *force)?,
        Cmd::Id { key_file } => keyfile::load(&keyfile::expand_tilde(key_file))?,
    };
    println!("{}", keypair.agent_id());
    Ok(())
}

async fn run_node(args: Args) -> anyhow::Result<()> {
    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.net.listen_port = port;
    }
    if let Some(name) = args.name {
        config.net.display_name = name;
    }
    if let Some(reward) = args.reward {
        config.net.reward_per_question = reward;
    }
    config.net.seed_peers.extend(args.seeds);

    // ── Identity ──────────────────────────────────────────────────────────────
    let keypair = keyfile::load_or_generate(&keyfile::expand_tilde(&args.key_file))?;
    let agent_id = keypair.agent_id().clone();
    info!(agent = %agent_id, name = %config.net.display_name, "AgentNet node starting");

    // ── P2P transport ─────────────────────────────────────────────────────────
    let (network, transport) = P2pNetwork::new(&config.p2p, &keypair)
        .map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    info!(peer_id = %transport.local_peer_id(), "P2P identity");
    tokio::spawn(network.run());

    // ── Collaborators ─────────────────────────────────────────────────────────
    let responder: Arc<dyn Responder> = match &config.responder {
        ResponderConfig::Echo => Arc::new(EchoResponder::new(config.net.display_name.clone())),
        ResponderConfig::Chat(chat) => Arc::new(ChatResponder::new(chat.clone(), agent_id.clone())?),
    };
    let treasury: Arc<dyn TokenTransfer> = match &config.settlement {
        SettlementConfig::DryRun => Arc::new(DryRunTransfer::default()),
        SettlementConfig::Rpc(rpc) => Arc::new(RpcTokenTransfer::new(rpc)?),
    };

    // ── Network session ───────────────────────────────────────────────────────
    let facade = Arc::new(NetworkFacade::new(
        config.net.clone(),
        Arc::new(keypair),
        Arc::new(transport),
        responder,
        treasury,
    ));
    let addresses = facade
        .start(config.net.listen_port, &config.net.seed_peers)
        .await
        .context("starting network session")?;
    for address in &addresses {
        println!("listening on {address}");
    }
    info!(agent = %agent_id, "node ready");

    let outcome = tokio::select! {
        r = console::run(facade.clone(), config.net.reward_per_question) => match r {
            Ok(ConsoleExit::EndOfInput) => {
                info!("console input closed; running until Ctrl-C");
                interrupted().await
            }
            other => other.map(|_| ()),
        },
        r = interrupted() => r,
    };

    facade.stop().await;
    info!("node stopped");
    outcome
}

async fn interrupted() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("interrupt received");
    Ok(())
}

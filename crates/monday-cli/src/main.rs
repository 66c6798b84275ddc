use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use monday_core::{Config, NetworkSelection, resolve};
use monday_node::{EngineFactory, LifecycleManager};
use monday_secrets::{CredentialStore, FileSecretStore};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "monday")]
#[command(author, version, about = "A self-custodial Lightning node in your terminal")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Network to run on (defaults to the configured one)
    #[arg(long, global = true)]
    network: Option<NetworkSelection>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Node(NodeCommand),
    /// Delete the wallet seed and node storage
    DeleteWallet,
}

/// Commands that run against a started node.
#[derive(clap::Subcommand, Debug)]
enum NodeCommand {
    /// Show node id, listening addresses and balances
    Info,
    /// Print an on-chain funding address
    Address,
    /// List channels
    Channels,
    /// List payments
    Payments,
    /// List peers
    Peers,
    /// Print and acknowledge pending events
    Events,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::new(filter))
        .init();
}

/// Render a core error as `title: detail`.
fn report(error: monday_core::Error) -> anyhow::Error {
    let display = error.display();
    anyhow!("{}: {}", display.title, display.detail)
}

#[cfg(feature = "ldk")]
fn engine_factory() -> Result<Arc<dyn EngineFactory>> {
    Ok(Arc::new(monday_node::LdkEngineFactory::new()))
}

#[cfg(not(feature = "ldk"))]
fn engine_factory() -> Result<Arc<dyn EngineFactory>> {
    Err(anyhow!(
        "this build has no node engine; rebuild with `--features ldk`"
    ))
}

fn credential_store(config: &Config) -> CredentialStore {
    CredentialStore::new(Arc::new(FileSecretStore::new(config.secrets_dir())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load().map_err(report)?;
    let network = cli.network.unwrap_or(config.network);

    let command = match cli.command {
        Commands::Node(command) => command,
        Commands::DeleteWallet => {
            monday_node::wipe_wallet(&credential_store(&config), &config.node_settings())
                .map_err(report)?;
            println!("Wallet deleted.");
            return Ok(());
        }
    };

    let manager = LifecycleManager::new(
        engine_factory()?,
        credential_store(&config),
        config.node_settings(),
    );

    tracing::info!(%network, "Starting node");
    manager
        .build(&resolve(network), None)
        .await
        .map_err(report)?;
    manager.start().await.map_err(report)?;

    let outcome = execute(&manager, network, &command).await;

    manager.stop().await.map_err(report)?;
    outcome
}

async fn execute(
    manager: &LifecycleManager,
    network: NetworkSelection,
    command: &NodeCommand,
) -> Result<()> {
    let commands = manager.commands();

    match command {
        NodeCommand::Info => {
            let profile = resolve(network);
            println!("Network:    {} ({})", profile.network, profile.color);
            println!("Node ID:    {}", commands.node_id().await.map_err(report)?);
            for address in commands.listening_addresses().await.map_err(report)? {
                println!("Listening:  {address}");
            }
            let balances = commands.balances().await.map_err(report)?;
            println!(
                "On-chain:   {} sats ({} spendable)",
                balances.total_onchain_sats, balances.spendable_onchain_sats
            );
            println!("Lightning:  {} sats", balances.total_lightning_sats);
        }
        NodeCommand::Address => {
            println!("{}", commands.new_funding_address().await.map_err(report)?);
        }
        NodeCommand::Channels => {
            let channels = commands.list_channels().await.map_err(report)?;
            if channels.is_empty() {
                println!("No channels.");
            }
            for channel in channels {
                println!(
                    "{}  peer {}  {} sats  out {} msat  in {} msat  {}",
                    channel.channel_id,
                    channel.counterparty_node_id,
                    channel.channel_value_sats,
                    channel.outbound_capacity_msat,
                    channel.inbound_capacity_msat,
                    if channel.is_usable { "usable" } else { "pending" },
                );
            }
        }
        NodeCommand::Payments => {
            let payments = commands.list_payments().await.map_err(report)?;
            if payments.is_empty() {
                println!("No payments.");
            }
            for payment in payments {
                let amount = payment
                    .amount_msat
                    .map_or_else(|| "any".to_string(), |a| format!("{a} msat"));
                println!(
                    "{}  {:?}  {:?}  {amount}",
                    payment.payment_hash, payment.direction, payment.status
                );
            }
        }
        NodeCommand::Peers => {
            let peers = commands.list_peers().await.map_err(report)?;
            if peers.is_empty() {
                println!("No peers.");
            }
            for peer in peers {
                println!(
                    "{}@{}  {}",
                    peer.node_id,
                    peer.address,
                    if peer.is_connected { "connected" } else { "disconnected" },
                );
            }
        }
        NodeCommand::Events => {
            let mut events = manager.event_classifier().map_err(report)?;
            let mut drained = 0usize;
            while let Some(event) = events.next_event().await.map_err(report)? {
                println!("{event}");
                events.acknowledge(&event).await.map_err(report)?;
                drained += 1;
            }
            if drained == 0 {
                println!("No pending events.");
            }
        }
    }

    Ok(())
}

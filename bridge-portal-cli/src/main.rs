// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use bridge_portal::approval::{strategy_for, ApprovalRequest, ApprovalTracker, TokenKind};
use bridge_portal::ledger::{
    BridgeTransaction, FileKeyValueStore, KeyValueStore, LedgerPage, PortalStateStore,
    TransactionLedger,
};
use bridge_portal::network::{ChainRole, ResolvedNetwork};
use bridge_portal::poll::ContextGeneration;
use bridge_portal::rpc::ChainClientFactory;
use bridge_portal::{
    Config, Direction, NetworkSelection, PortalConfig, PortalError, PortalMetrics,
    PortalNetwork, PortalSession,
};
use clap::{Parser, Subcommand};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use prometheus::{Encoder, Registry, TextEncoder};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case", author, version)]
struct Args {
    /// Portal config file (yaml or json)
    #[clap(env = "BRIDGE_PORTAL_CONFIG", long)]
    config: PathBuf,
    #[clap(subcommand)]
    command: PortalCommand,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum PortalCommand {
    /// Mount a session and print the history page on every reconcile tick
    Watch {
        #[clap(long, value_parser = parse_address)]
        account: Address,
        #[clap(long)]
        network: PortalNetwork,
        #[clap(long, default_value = "deposit")]
        direction: Direction,
        /// Chain the wallet is connected to; the probe only runs on the source chain
        #[clap(long)]
        connected_chain_id: Option<u64>,
        #[clap(long, default_value = "1")]
        page: usize,
        /// Stop after this many seconds instead of waiting for ctrl-c
        #[clap(long)]
        duration_secs: Option<u64>,
        /// Dump prometheus metrics on exit
        #[clap(long)]
        print_metrics: bool,
    },
    /// Print a page of the persisted ledger without contacting any service
    History {
        #[clap(long, value_parser = parse_address)]
        account: Address,
        #[clap(long)]
        network: PortalNetwork,
        #[clap(long, default_value = "1")]
        page: usize,
        #[clap(long, default_value = "10")]
        page_size: usize,
    },
    /// Read allowances for a transfer and report the contracts still to approve
    CheckApproval {
        #[clap(long)]
        network: PortalNetwork,
        #[clap(long, default_value = "deposit")]
        direction: Direction,
        #[clap(long, value_parser = parse_address)]
        owner: Address,
        /// ERC-20 token on the source chain; omit for the native token
        #[clap(long, value_parser = parse_address)]
        token: Option<Address>,
        /// Amount in the token's smallest unit
        #[clap(long, default_value = "1", value_parser = parse_amount)]
        amount: U256,
    },
    /// Check allowances and approve every missing spender from a local key
    Approve {
        #[clap(long)]
        network: PortalNetwork,
        #[clap(long, default_value = "deposit")]
        direction: Direction,
        /// Hex private key of the token owner
        #[clap(env = "BRIDGE_PORTAL_PRIVATE_KEY", long, hide_env_values = true)]
        private_key: String,
        #[clap(long, value_parser = parse_address)]
        token: Address,
        #[clap(long, value_parser = parse_amount)]
        amount: U256,
    },
}

fn parse_address(s: &str) -> Result<Address, String> {
    Address::from_str(s).map_err(|e| format!("invalid address {}: {}", s, e))
}

fn parse_amount(s: &str) -> Result<U256, String> {
    U256::from_dec_str(s).map_err(|e| format!("invalid amount {}: {}", s, e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = PortalConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    config.validate()?;

    match args.command {
        PortalCommand::Watch {
            account,
            network,
            direction,
            connected_chain_id,
            page,
            duration_secs,
            print_metrics,
        } => {
            let registry = Registry::new();
            let metrics = Arc::new(PortalMetrics::new(&registry));
            watch(
                config,
                metrics,
                NetworkSelection::new(network, direction),
                account,
                connected_chain_id,
                page,
                duration_secs.map(Duration::from_secs),
            )
            .await?;
            if print_metrics {
                let mut buffer = vec![];
                TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
                println!("{}", String::from_utf8(buffer)?);
            }
        }
        PortalCommand::History {
            account,
            network,
            page,
            page_size,
        } => {
            let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(&config.storage_dir)?);
            let ledger = TransactionLedger::open(
                network,
                PortalStateStore::new(kv, network.storage_key()),
                Arc::new(PortalMetrics::new_for_testing()),
            )?;
            let page = ledger.page(account, page, page_size).await?;
            print_page(&page);
        }
        PortalCommand::CheckApproval {
            network,
            direction,
            owner,
            token,
            amount,
        } => {
            let network_config = config.network(network)?;
            let resolved = resolve(&config, network, direction)?;
            let factory = ChainClientFactory::new(config.polling.receipt_poll_interval());
            let client = factory.read_only(&resolved.from).await?;
            let strategy = strategy_for(config.family, network_config);
            let request = ApprovalRequest {
                token: token.map(TokenKind::Erc20).unwrap_or(TokenKind::Native),
                owner,
                amount,
                from: resolved.from.role,
            };
            let state = strategy.check_approval(client.as_ref(), &request).await?;
            println!(
                "spenders on chain {} ({}): {:?}",
                resolved.from.id,
                match resolved.from.role {
                    ChainRole::L1 => "L1",
                    ChainRole::L2 => "L2",
                },
                state.spender_contracts
            );
            println!("approved: {:?}", state.approved_contracts);
            println!("needs approval: {}", state.needs_approval);
        }
        PortalCommand::Approve {
            network,
            direction,
            private_key,
            token,
            amount,
        } => {
            let network_config = config.network(network)?;
            let resolved = resolve(&config, network, direction)?;
            let wallet = private_key
                .trim_start_matches("0x")
                .parse::<LocalWallet>()
                .context("Invalid private key")?;
            let owner = wallet.address();
            let factory = ChainClientFactory::new(config.polling.receipt_poll_interval());
            let client = factory.signing(&resolved.from, wallet).await?;
            let tracker = ApprovalTracker::new(
                strategy_for(config.family, network_config),
                client,
                ContextGeneration::new(),
                Arc::new(PortalMetrics::new_for_testing()),
            );
            tracker
                .set_request(Some(ApprovalRequest {
                    token: TokenKind::Erc20(token),
                    owner,
                    amount,
                    from: resolved.from.role,
                }))
                .await;
            if !tracker.check_approval().await? {
                println!("{:?} needs no approval for {:?}", owner, token);
                return Ok(());
            }
            let fee = tracker.estimate_fee().await?;
            println!("estimated approval cost: {} wei", fee);
            tracker.approve().await?;
            if let Some(state) = tracker.state().await {
                println!("approved: {:?}", state.approved_contracts);
            }
        }
    }
    Ok(())
}

fn resolve(
    config: &PortalConfig,
    network: PortalNetwork,
    direction: Direction,
) -> anyhow::Result<ResolvedNetwork> {
    Ok(config
        .resolver()
        .resolve(&NetworkSelection::new(network, direction), None)
        .resolved()
        .cloned()
        .ok_or(PortalError::Unresolved)?)
}

async fn watch(
    config: PortalConfig,
    metrics: Arc<PortalMetrics>,
    selection: NetworkSelection,
    account: Address,
    connected_chain_id: Option<u64>,
    page: usize,
    duration: Option<Duration>,
) -> anyhow::Result<()> {
    let interval = config.polling.reconcile_interval();
    let session = PortalSession::from_config(config, metrics)?;
    let history = session
        .mount(selection, Some(account), connected_chain_id)
        .await?
        .ok_or(PortalError::Unresolved)
        .with_context(|| format!("Nothing to watch for {:?}", selection))?;

    let deadline = duration.map(|d| tokio::time::Instant::now() + d);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, unmounting");
                break;
            }
            _ = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => break,
            _ = ticker.tick() => {
                match history.refresh_page(page).await {
                    Ok(page) => print_page(&page),
                    Err(e) => tracing::warn!("Failed to refresh page: {}", e),
                }
                if let Some(message) = history.error_message().await {
                    println!("error: {}", message);
                }
            }
        }
    }
    session.unmount().await;
    Ok(())
}

fn print_page(page: &LedgerPage) {
    println!(
        "page {}/{} ({} transactions)",
        page.page,
        page.total_pages().max(1),
        page.total
    );
    for tx in &page.items {
        print_transaction(tx);
    }
}

fn print_transaction(tx: &BridgeTransaction) {
    let token = tx
        .token_address
        .map(|a| format!("{:?}", a))
        .unwrap_or_else(|| "native".to_string());
    let status = match tx.assumed_status {
        Some(_) if !tx.status.is_terminal() => format!("{} (assumed)", tx.display_status()),
        _ => tx.status.to_string(),
    };
    println!(
        "  {:?} {:<8} {:<16} {} {}{}",
        tx.hash,
        tx.direction,
        status,
        tx.amount,
        token,
        tx.counterpart_hash
            .map(|h| format!(" -> {:?}", h))
            .unwrap_or_default()
    );
}

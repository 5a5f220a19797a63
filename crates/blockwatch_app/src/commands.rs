use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use blockwatch_chain::erc20::parse_address;
use blockwatch_chain::{
    BlockTag, BlockTimeObserver, ChainError, FailurePolicy, HeightFeed, JsonRpcClient,
    ObservationRecord, ObserverHandle, ObserverSession, RpcConfig, RpcConfigStore,
    WsHeightSubscriber, erc20_balance, format_ether,
};
use blockwatch_core::{ObserveStrategy, WatchConfig};
use futures::future::join_all;
use tracing::{info, warn};

use crate::cli::{BlockTimeArgs, Command};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Resolved configuration shared by all commands.
pub struct AppContext {
    config: WatchConfig,
    store: RpcConfigStore,
    network: String,
}

impl AppContext {
    /// Apply the global `--network` / `--rpc-url` flags on top of `config`.
    pub fn new(
        config: WatchConfig,
        network: Option<String>,
        rpc_url: Option<String>,
    ) -> Result<Self> {
        let network = network.unwrap_or_else(|| config.default_network.clone());
        let mut store = RpcConfigStore::new(config.clone());
        if let Some(url) = rpc_url {
            store
                .set_custom_rpc(&network, url)
                .context("Invalid --rpc-url")?;
        }
        Ok(Self {
            config,
            store,
            network,
        })
    }

    fn rpc(&self, network: &str) -> Result<RpcConfig> {
        self.store
            .get_rpc(network)
            .with_context(|| format!("Cannot use network {network}"))
    }

    fn client(&self, network: &str) -> Result<(RpcConfig, JsonRpcClient)> {
        let rpc = self.rpc(network)?;
        let client = JsonRpcClient::from_config(&rpc)?;
        Ok((rpc, client))
    }
}

/// Dispatch a parsed command.
pub async fn run(ctx: AppContext, command: Command) -> Result<()> {
    match command {
        Command::Network => network_info(&ctx).await,
        Command::BlockNumber => block_number(&ctx).await,
        Command::BlockDiff { ahead, behind } => block_diff(&ctx, &ahead, &behind).await,
        Command::BlockTime(args) => block_time(&ctx, args).await,
        Command::BlockInfo { number, full } => block_info(&ctx, number, full).await,
        Command::Balance { address } => balance(&ctx, &address).await,
        Command::Erc20Balance { token, owner } => token_balance(&ctx, &token, &owner).await,
    }
}

// ---------------------------------------------------------------------------
// One-shot queries
// ---------------------------------------------------------------------------

async fn network_info(ctx: &AppContext) -> Result<()> {
    let (rpc, client) = ctx.client(&ctx.network)?;
    let chain_id = client.chain_id().await?;
    println!("Provider's network name: {}", rpc.network);
    println!("Provider's network chain id: {chain_id}");
    check_chain_id(&rpc, chain_id)?;
    Ok(())
}

fn check_chain_id(rpc: &RpcConfig, actual: u64) -> Result<(), ChainError> {
    match rpc.chain_id {
        Some(expected) if expected != actual => {
            Err(ChainError::ChainIdMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

async fn block_number(ctx: &AppContext) -> Result<()> {
    let (rpc, client) = ctx.client(&ctx.network)?;
    let height = client.block_number().await?;
    println!("{} block number: {height}", rpc.network);
    Ok(())
}

async fn block_diff(ctx: &AppContext, ahead: &str, behind: &str) -> Result<()> {
    let (rpc_a, client_a) = ctx.client(ahead)?;
    let (rpc_b, client_b) = ctx.client(behind)?;
    let (height_a, height_b) = tokio::try_join!(client_a.block_number(), client_b.block_number())?;

    println!("{} block number: {height_a}", rpc_a.network);
    println!("{} block number: {height_b}", rpc_b.network);
    println!("{}", diff_message(&rpc_a.network, height_a, height_b));
    Ok(())
}

fn diff_message(ahead: &str, height_a: u64, height_b: u64) -> String {
    let diff = i128::from(height_a) - i128::from(height_b);
    format!("{ahead} is {diff} blocks ahead")
}

async fn block_info(ctx: &AppContext, number: Option<u64>, full: bool) -> Result<()> {
    let (rpc, client) = ctx.client(&ctx.network)?;
    let tag = match number {
        Some(n) => BlockTag::Number(n),
        None => BlockTag::Number(client.block_number().await?),
    };
    let Some(block) = client.get_block(tag, full).await? else {
        bail!("Block {tag:?} not found on {}", rpc.network);
    };

    println!("Block {} on {}", block.height()?, rpc.network);
    println!("  hash:         {}", block.hash);
    println!("  timestamp:    {}", block.unix_timestamp()?);
    if let Some(miner) = &block.miner {
        println!("  miner:        {miner}");
    }
    println!("  transactions: {}", block.transactions.len());

    let Some(hash) = block.transaction_hash(0) else {
        return Ok(());
    };
    match client.get_transaction_receipt(hash).await? {
        Some(receipt) => {
            let to = receipt
                .to
                .as_deref()
                .or(receipt.contract_address.as_deref())
                .unwrap_or("(contract creation)");
            println!("First transaction {}", receipt.transaction_hash);
            println!("  A transaction from {} to {to}", receipt.from);
            if let Some(ok) = receipt.succeeded() {
                println!("  status: {}", if ok { "success" } else { "reverted" });
            }
        }
        None => println!("First transaction {hash} has no receipt yet"),
    }
    if full {
        for tx in block.transactions.iter().skip(1) {
            if let Some(hash) = tx.get("hash").and_then(|h| h.as_str()) {
                println!("  tx {hash}");
            }
        }
    }
    Ok(())
}

async fn balance(ctx: &AppContext, address: &str) -> Result<()> {
    require_hex_address(address)?;
    let (_, client) = ctx.client(&ctx.network)?;
    let wei = client.get_balance(address, BlockTag::Latest).await?;
    println!("{address} has {} ETH", format_ether(wei));
    Ok(())
}

async fn token_balance(ctx: &AppContext, token: &str, owner: &str) -> Result<()> {
    require_hex_address(token)?;
    require_hex_address(owner)?;
    let (_, client) = ctx.client(&ctx.network)?;
    let balance = erc20_balance(&client, token, owner).await?;
    println!("{owner} holds {} of token {token}", balance.formatted()?);
    Ok(())
}

fn require_hex_address(raw: &str) -> Result<()> {
    if raw.ends_with(".eth") {
        bail!("ENS names are not resolved; pass a 0x address instead of {raw}");
    }
    parse_address(raw)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// block-time
// ---------------------------------------------------------------------------

/// Fully resolved `block-time` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTimePlan {
    pub networks: Vec<String>,
    pub blocks: u32,
    pub strategy: ObserveStrategy,
    pub interval: Duration,
    pub policy: FailurePolicy,
}

impl BlockTimePlan {
    /// Command-line flags win over the config's `[observer]` table.
    pub fn resolve(args: &BlockTimeArgs, config: &WatchConfig, network: &str) -> Result<Self> {
        let networks = if args.networks.is_empty() {
            vec![network.to_string()]
        } else {
            args.networks.clone()
        };
        let blocks = args.blocks.unwrap_or(config.observer.blocks);
        if blocks == 0 {
            bail!("--blocks must be at least 1");
        }
        let interval_ms = args.interval_ms.unwrap_or(config.observer.poll_interval_ms);
        if interval_ms == 0 {
            bail!("--interval-ms must be greater than 0");
        }
        let retries = args
            .retries
            .unwrap_or(config.observer.max_consecutive_failures);

        Ok(Self {
            networks,
            blocks,
            strategy: args.strategy.unwrap_or(config.observer.strategy),
            interval: Duration::from_millis(interval_ms),
            policy: FailurePolicy::from_max_failures(retries),
        })
    }
}

fn build_observer(rpc: &RpcConfig, plan: &BlockTimePlan) -> Result<BlockTimeObserver> {
    let feed = match plan.strategy {
        ObserveStrategy::Poll => HeightFeed::Poll {
            source: Arc::new(JsonRpcClient::from_config(rpc)?),
            interval: plan.interval,
        },
        ObserveStrategy::Push => HeightFeed::Push {
            subscriber: Arc::new(WsHeightSubscriber::from_config(rpc)?),
        },
    };
    Ok(BlockTimeObserver::new(feed, plan.policy))
}

async fn block_time(ctx: &AppContext, args: BlockTimeArgs) -> Result<()> {
    let plan = BlockTimePlan::resolve(&args, &ctx.config, &ctx.network)?;
    info!(
        networks = ?plan.networks,
        blocks = plan.blocks,
        strategy = %plan.strategy,
        "Starting block-time observation"
    );

    let mut handles: Vec<ObserverHandle> = Vec::with_capacity(plan.networks.len());
    for name in &plan.networks {
        let rpc = ctx.rpc(name)?;
        let observer = build_observer(&rpc, &plan)?;
        let session = ObserverSession::new(rpc.network.clone(), plan.blocks)?;
        handles.push(observer.spawn(session));
    }

    let json = args.json;
    let interrupted = tokio::select! {
        _ = join_all(handles.iter_mut().map(|handle| async move {
            while let Some(record) = handle.next_record().await {
                print_record(&record, json);
            }
        })) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        warn!("Interrupted, cancelling observers");
        for handle in &mut handles {
            handle.cancel();
        }
    }

    let mut first_error = None;
    for handle in handles {
        let outcome = handle.join().await.context("Observer task panicked")?;
        let network = outcome.session.network().to_string();
        match outcome.result {
            Ok(()) => info!(
                network = %network,
                blocks = outcome.session.transitions(),
                "Observation finished"
            ),
            Err(ChainError::Cancelled) => {}
            Err(e) => {
                warn!(network = %network, "Observation failed: {e}");
                if first_error.is_none() {
                    first_error = Some(anyhow::Error::new(e).context(format!(
                        "block-time on {network} stopped after {} of {} blocks",
                        outcome.session.transitions(),
                        outcome.session.target()
                    )));
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn print_record(record: &ObservationRecord, json: bool) {
    if json {
        match serde_json::to_string(record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Cannot serialize record: {e}"),
        }
    } else {
        println!("{}", format_record(record));
    }
}

fn format_record(record: &ObservationRecord) -> String {
    format!(
        "{network} New Block num: {height}\n{network} It took: {ms} ms",
        network = record.network,
        height = record.height,
        ms = record.elapsed_ms()
    )
}

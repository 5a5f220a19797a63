use std::path::PathBuf;

use blockwatch_core::ObserveStrategy;
use clap::{Args, Parser, Subcommand};

/// Observe EVM chains over JSON-RPC.
#[derive(Parser, Debug)]
#[command(name = "blockwatch", version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to ~/.blockwatch/config.toml)
    #[arg(long, global = true, env = "BLOCKWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Network to query (defaults to the config's default_network)
    #[arg(short, long, global = true)]
    pub network: Option<String>,

    /// Use this HTTP RPC endpoint instead of the configured one
    #[arg(long, global = true)]
    pub rpc_url: Option<String>,

    /// Log filter, e.g. "debug" or "blockwatch_chain=trace"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Also write daily-rotated log files to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the network name and chain id reported by the node
    Network,
    /// Show the latest block number
    BlockNumber,
    /// Compare the latest block numbers of two networks
    BlockDiff {
        /// Network expected to be ahead
        ahead: String,
        /// Network to compare against
        behind: String,
    },
    /// Measure the time between new blocks
    BlockTime(BlockTimeArgs),
    /// Show a block and the receipt of its first transaction
    BlockInfo {
        /// Block number (latest when omitted)
        #[arg(long)]
        number: Option<u64>,
        /// Fetch full transaction objects with the block
        #[arg(long)]
        full: bool,
    },
    /// Show the ether balance of an address
    Balance { address: String },
    /// Show the ERC-20 token balance of an address
    Erc20Balance {
        /// Token contract address
        #[arg(short, long)]
        token: String,
        owner: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct BlockTimeArgs {
    /// Networks to observe concurrently (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub networks: Vec<String>,

    /// Number of new blocks to observe per network
    #[arg(short, long)]
    pub blocks: Option<u32>,

    /// "poll" (eth_blockNumber on a timer) or "push" (newHeads subscription)
    #[arg(short, long)]
    pub strategy: Option<ObserveStrategy>,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Consecutive failed polls to tolerate (0 stops on the first failure)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Print records as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_block_time_with_networks() {
        let cli = Cli::try_parse_from([
            "blockwatch",
            "block-time",
            "--networks",
            "mainnet,goerli",
            "--blocks",
            "5",
            "--strategy",
            "push",
        ])
        .unwrap();
        match cli.command {
            Command::BlockTime(args) => {
                assert_eq!(args.networks, vec!["mainnet", "goerli"]);
                assert_eq!(args.blocks, Some(5));
                assert_eq!(args.strategy, Some(ObserveStrategy::Push));
                assert!(!args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_strategy() {
        let result =
            Cli::try_parse_from(["blockwatch", "block-time", "--strategy", "sometimes"]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "blockwatch",
            "balance",
            "0x742d35Cc6634C0532925a3b844Bc9e7595f2bD18",
            "--network",
            "goerli",
            "--rpc-url",
            "http://localhost:8545",
        ])
        .unwrap();
        assert_eq!(cli.network.as_deref(), Some("goerli"));
        assert_eq!(cli.rpc_url.as_deref(), Some("http://localhost:8545"));
        assert!(matches!(cli.command, Command::Balance { .. }));
    }

    #[test]
    fn parses_erc20_balance() {
        let cli = Cli::try_parse_from([
            "blockwatch",
            "erc20-balance",
            "--token",
            "0x326c977e6efc84e512bb9c30f76e30c160ed06fb",
            "0x742d35Cc6634C0532925a3b844Bc9e7595f2bD18",
        ])
        .unwrap();
        match cli.command {
            Command::Erc20Balance { token, owner } => {
                assert!(token.starts_with("0x326c"));
                assert!(owner.starts_with("0x742d"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

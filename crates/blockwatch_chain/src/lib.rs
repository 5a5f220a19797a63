//! EVM chain access for blockwatch: network endpoints, a small JSON-RPC
//! client, `newHeads` subscriptions and the block-time observer.

pub mod erc20;
pub mod error;
pub mod observer;
pub mod rpc;
pub mod rpc_config;
pub mod source;
pub mod units;
pub mod ws;

// Re-export primary types for convenient access.
pub use erc20::{Erc20Balance, erc20_balance};
pub use error::ChainError;
pub use observer::{
    BlockTimeObserver, FailurePolicy, HeightFeed, ObservationRecord, ObserverHandle,
    ObserverSession, SessionOutcome, SessionState,
};
pub use rpc::{Block, BlockTag, JsonRpcClient, TransactionReceipt};
pub use rpc_config::{RpcConfig, RpcConfigStore, validate_url, validate_ws_url};
pub use source::{HeightSource, HeightSubscriber, HeightSubscription};
pub use units::{format_ether, format_units};
pub use ws::WsHeightSubscriber;

pub use alloy_primitives::{Address, U256};

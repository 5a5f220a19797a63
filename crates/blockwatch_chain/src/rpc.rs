//! Minimal JSON-RPC 2.0 client over HTTP for the handful of `eth_*` methods
//! the CLI needs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::U256;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ChainError;
use crate::rpc_config::RpcConfig;
use crate::units::{parse_quantity, parse_u64_quantity, to_quantity};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Which block a state query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl BlockTag {
    fn to_param(self) -> Value {
        match self {
            Self::Latest => Value::String("latest".into()),
            Self::Number(n) => Value::String(to_quantity(n)),
        }
    }
}

/// The parts of `eth_getBlockByNumber` the CLI reports.
///
/// `transactions` holds hashes, or full objects when requested with
/// `full_transactions = true`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: String,
    pub hash: String,
    pub timestamp: String,
    #[serde(default)]
    pub miner: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub transactions: Vec<Value>,
}

impl Block {
    pub fn height(&self) -> Result<u64, ChainError> {
        parse_u64_quantity(&self.number)
    }

    pub fn unix_timestamp(&self) -> Result<u64, ChainError> {
        parse_u64_quantity(&self.timestamp)
    }

    /// Hash of the transaction at `index`, whether or not the block was
    /// fetched with full transaction objects.
    pub fn transaction_hash(&self, index: usize) -> Option<&str> {
        match self.transactions.get(index)? {
            Value::String(hash) => Some(hash.as_str()),
            Value::Object(tx) => tx.get("hash").and_then(Value::as_str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
}

impl TransactionReceipt {
    /// `Some(true)` for status `0x1`; `None` for pre-Byzantium receipts.
    pub fn succeeded(&self) -> Option<bool> {
        self.status
            .as_deref()
            .map(|s| parse_quantity(s).map(|v| v == U256::from(1u8)).unwrap_or(false))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// JSON-RPC client bound to one network's HTTP endpoint.
pub struct JsonRpcClient {
    network: String,
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(
        network: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            network: network.into(),
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(rpc: &RpcConfig) -> Result<Self, ChainError> {
        Self::new(rpc.network.clone(), rpc.url.clone(), rpc.timeout())
    }

    /// Network label this client was created for.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Issue a single JSON-RPC call and deserialize its `result`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        debug!(network = %self.network, id, method, "rpc request");

        let resp = self.client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChainError::Transport(format!("HTTP {status}: {text}")));
        }
        let resp: RpcResponse = resp.json().await?;
        decode_response(resp)
    }

    /// `eth_blockNumber`
    pub async fn block_number(&self) -> Result<u64, ChainError> {
        let raw: String = self.request("eth_blockNumber", json!([])).await?;
        parse_u64_quantity(&raw)
    }

    /// `eth_chainId`
    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        let raw: String = self.request("eth_chainId", json!([])).await?;
        parse_u64_quantity(&raw)
    }

    /// `eth_getBalance`, in wei.
    pub async fn get_balance(&self, address: &str, at: BlockTag) -> Result<U256, ChainError> {
        let raw: String = self
            .request("eth_getBalance", json!([address, at.to_param()]))
            .await?;
        parse_quantity(&raw)
    }

    /// `eth_getBlockByNumber`. `None` when the node does not know the block.
    pub async fn get_block(
        &self,
        at: BlockTag,
        full_transactions: bool,
    ) -> Result<Option<Block>, ChainError> {
        self.request(
            "eth_getBlockByNumber",
            json!([at.to_param(), full_transactions]),
        )
        .await
    }

    /// `eth_getTransactionReceipt`. `None` while the transaction is pending.
    pub async fn get_transaction_receipt(
        &self,
        hash: &str,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.request("eth_getTransactionReceipt", json!([hash])).await
    }

    /// `eth_call` against the latest block; returns the raw return data.
    pub async fn call(&self, to: &str, data: &str) -> Result<String, ChainError> {
        self.request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }
}

fn decode_response<T: DeserializeOwned>(resp: RpcResponse) -> Result<T, ChainError> {
    if let Some(err) = resp.error {
        return Err(ChainError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    // A missing result is passed through as null so Option<T> results work.
    let result = resp.result.unwrap_or(Value::Null);
    Ok(serde_json::from_value(result)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(raw: &str) -> RpcResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn request_serializes_as_jsonrpc_2() {
        let req = RpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "eth_blockNumber",
            params: json!([]),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "eth_blockNumber", "params": []})
        );
    }

    #[test]
    fn decodes_result() {
        let resp = response(r#"{"jsonrpc":"2.0","id":1,"result":"0x10d4f"}"#);
        let raw: String = decode_response(resp).unwrap();
        assert_eq!(parse_u64_quantity(&raw).unwrap(), 68_943);
    }

    #[test]
    fn maps_error_object() {
        let resp = response(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#,
        );
        let err = decode_response::<String>(resp).unwrap_err();
        match err {
            ChainError::Rpc { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_result_decodes_to_none() {
        let resp = response(r#"{"jsonrpc":"2.0","id":1,"result":null}"#);
        let receipt: Option<TransactionReceipt> = decode_response(resp).unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn wrong_result_type_is_serialization_error() {
        let resp = response(r#"{"jsonrpc":"2.0","id":1,"result":42}"#);
        let err = decode_response::<String>(resp).unwrap_err();
        assert!(matches!(err, ChainError::Serialization(_)));
    }

    #[test]
    fn block_tag_params() {
        assert_eq!(BlockTag::Latest.to_param(), json!("latest"));
        assert_eq!(BlockTag::Number(255).to_param(), json!("0xff"));
    }

    #[test]
    fn block_reads_hashes_and_full_transactions() {
        let hashes: Block = serde_json::from_value(json!({
            "number": "0x10",
            "hash": "0xabc",
            "timestamp": "0x6500",
            "gasUsed": "0x5208",
            "transactions": ["0x01", "0x02"]
        }))
        .unwrap();
        assert_eq!(hashes.height().unwrap(), 16);
        assert_eq!(hashes.unix_timestamp().unwrap(), 0x6500);
        assert_eq!(hashes.transaction_hash(1), Some("0x02"));
        assert_eq!(hashes.transaction_hash(2), None);

        let full: Block = serde_json::from_value(json!({
            "number": "0x10",
            "hash": "0xabc",
            "timestamp": "0x6500",
            "transactions": [{"hash": "0xfeed", "from": "0x1"}]
        }))
        .unwrap();
        assert_eq!(full.transaction_hash(0), Some("0xfeed"));
    }

    #[test]
    fn receipt_status() {
        let ok: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0x1",
            "from": "0xa",
            "to": "0xb",
            "status": "0x1"
        }))
        .unwrap();
        assert_eq!(ok.succeeded(), Some(true));

        let legacy: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0x1",
            "from": "0xa",
            "to": null
        }))
        .unwrap();
        assert_eq!(legacy.succeeded(), None);
        assert!(legacy.to.is_none());
    }

    #[test]
    fn client_keeps_network_label() {
        let client =
            JsonRpcClient::new("goerli", "http://127.0.0.1:8545", Duration::from_secs(5)).unwrap();
        assert_eq!(client.network(), "goerli");
    }
}

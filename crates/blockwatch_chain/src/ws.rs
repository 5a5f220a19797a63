//! `eth_subscribe("newHeads")` over WebSocket.
//!
//! The subscriber performs the subscribe handshake in the caller's task, then
//! hands the socket to a background reader that forwards block numbers into
//! the [`HeightSubscription`] channel. Unsubscribing sends `eth_unsubscribe`
//! and closes the socket.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::ChainError;
use crate::rpc_config::RpcConfig;
use crate::source::{HeightSubscriber, HeightSubscription};
use crate::units::parse_u64_quantity;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const SUBSCRIBE_ID: u64 = 1;
const UNSUBSCRIBE_ID: u64 = 2;
const CHANNEL_CAPACITY: usize = 64;

/// Subscribes to new block headers on a WebSocket endpoint.
pub struct WsHeightSubscriber {
    network: String,
    url: String,
    handshake_timeout: Duration,
}

impl WsHeightSubscriber {
    pub fn new(network: impl Into<String>, url: impl Into<String>, handshake_timeout: Duration) -> Self {
        Self {
            network: network.into(),
            url: url.into(),
            handshake_timeout,
        }
    }

    /// Build from a resolved network entry, expanding its `ws_url`. Fails
    /// when the network has none.
    pub fn from_config(rpc: &RpcConfig) -> Result<Self, ChainError> {
        let url = rpc.ws_endpoint()?.ok_or_else(|| {
            ChainError::InvalidConfig(format!(
                "network {} has no ws_url; push observation needs one",
                rpc.network
            ))
        })?;
        Ok(Self::new(rpc.network.clone(), url, rpc.timeout()))
    }

    async fn handshake(&self) -> Result<(WsSink, WsSource, String), ChainError> {
        let (socket, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut source) = socket.split();

        let request = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_ID,
            "method": "eth_subscribe",
            "params": ["newHeads"],
        });
        sink.send(Message::Text(request.to_string().into())).await?;

        while let Some(frame) = source.next().await {
            match frame? {
                Message::Text(text) => {
                    if let Some(id) = subscription_id(text.as_str(), SUBSCRIBE_ID)? {
                        return Ok((sink, source, id));
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(ChainError::Subscription(
            "connection closed before eth_subscribe was acknowledged".into(),
        ))
    }
}

#[async_trait]
impl HeightSubscriber for WsHeightSubscriber {
    async fn subscribe(&self) -> Result<HeightSubscription, ChainError> {
        let (sink, source, id) = tokio::time::timeout(self.handshake_timeout, self.handshake())
            .await
            .map_err(|_| ChainError::Timeout(self.handshake_timeout))??;
        info!(network = %self.network, subscription = %id, "subscribed to newHeads");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let network = self.network.clone();
        let task = tokio::spawn(async move {
            read_loop(network, id, sink, source, tx, shutdown_rx).await;
        });
        Ok(HeightSubscription::new(rx, shutdown_tx, task))
    }
}

async fn read_loop(
    network: String,
    id: String,
    mut sink: WsSink,
    mut source: WsSource,
    tx: mpsc::Sender<Result<u64, ChainError>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tx.closed() => break,
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(height) = notification_height(text.as_str(), &id) {
                        if tx.send(height).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    warn!(network = %network, "newHeads socket closed by remote");
                    let _ = tx
                        .send(Err(ChainError::Subscription("closed by remote".into())))
                        .await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            }
        }
    }

    let request = json!({
        "jsonrpc": "2.0",
        "id": UNSUBSCRIBE_ID,
        "method": "eth_unsubscribe",
        "params": [id],
    });
    if let Err(e) = sink.send(Message::Text(request.to_string().into())).await {
        debug!(network = %network, "eth_unsubscribe not sent: {e}");
    }
    let _ = sink.send(Message::Close(None)).await;
    debug!(network = %network, "newHeads subscription removed");
}

/// Extract the subscription id from the response to request `expected_id`.
///
/// `Ok(None)` means the frame is unrelated and the caller should keep reading.
fn subscription_id(text: &str, expected_id: u64) -> Result<Option<String>, ChainError> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("id").and_then(Value::as_u64) != Some(expected_id) {
        return Ok(None);
    }
    if let Some(err) = value.get("error") {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(ChainError::Rpc { code, message });
    }
    value
        .get("result")
        .and_then(Value::as_str)
        .map(|id| Some(id.to_string()))
        .ok_or_else(|| ChainError::InvalidResponse("eth_subscribe returned no id".into()))
}

/// Block number carried by an `eth_subscription` notification for
/// `subscription`. `None` for any other frame.
fn notification_height(text: &str, subscription: &str) -> Option<Result<u64, ChainError>> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return None;
    }
    let params = value.get("params")?;
    if params.get("subscription").and_then(Value::as_str) != Some(subscription) {
        return None;
    }
    let number = params
        .get("result")
        .and_then(|header| header.get("number"))
        .and_then(Value::as_str);
    Some(match number {
        Some(raw) => parse_u64_quantity(raw),
        None => Err(ChainError::InvalidResponse(
            "newHeads notification without a block number".into(),
        )),
    })
}

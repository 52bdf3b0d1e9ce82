//! JSON-RPC client for connecting to a full node over websocket

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, trace, warn};

use rpc_core::{model::*, NotificationApi, Notifications, RpcApi};

const BLOCK_ADDED_METHOD: &str = "blockAdded";
const CHAIN_CHANGED_METHOD: &str = "chainChanged";

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// Server-initiated message without an id
#[derive(Debug, Deserialize)]
struct JsonRpcNotification {
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

pub struct RpcClient {
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        url::Url::parse(url).map_err(|e| RpcError::Internal(format!("Invalid url {}: {}", url, e)))?;
        Ok(Self {
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    fn next_request(&self, method: &str, params: serde_json::Value) -> Result<(u64, String), RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RpcError::Internal(format!("Request serialization failed: {}", e)))?;
        Ok((id, request_json))
    }

    async fn call_method(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| RpcError::Network(format!("WebSocket connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();

        let (id, request_json) = self.next_request(method, params)?;
        trace!("-> {}", request_json);
        write
            .send(Message::Text(request_json))
            .await
            .map_err(|e| RpcError::Network(format!("Send failed: {}", e)))?;

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let response: JsonRpcResponse = serde_json::from_str(&text)
                        .map_err(|e| RpcError::Internal(format!("Response parsing failed: {}", e)))?;

                    if response.id != Some(id) {
                        continue;
                    }

                    if let Some(error) = response.error {
                        return Err(RpcError::Rpc { code: error.code, message: error.message });
                    }

                    return Ok(response.result);
                }
                Ok(Message::Close(_)) => break,
                Err(e) => return Err(RpcError::Network(format!("WebSocket error: {}", e))),
                _ => continue,
            }
        }

        Err(RpcError::Network("Connection closed without response".to_string()))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T, RpcError> {
        let result = self.call_method(method, params).await?;
        serde_json::from_value(result).map_err(|e| RpcError::Internal(format!("Deserialization error: {}", e)))
    }
}

#[async_trait]
impl RpcApi for RpcClient {
    async fn get_blocks(
        &self,
        low_hash: Option<&str>,
        include_raw: bool,
        include_verbose: bool,
    ) -> Result<GetBlocksResponse, RpcError> {
        let params = serde_json::json!({
            "lowHash": low_hash,
            "includeRawBlockData": include_raw,
            "includeVerboseBlockData": include_verbose,
        });
        self.call("getBlocks", params).await
    }

    async fn get_block(&self, hash: &str, include_raw: bool, include_verbose: bool) -> Result<GetBlockResponse, RpcError> {
        let params = serde_json::json!({
            "hash": hash,
            "includeRawBlockData": include_raw,
            "includeVerboseBlockData": include_verbose,
        });
        self.call("getBlock", params).await
    }

    async fn get_chain_from_block(
        &self,
        start_hash: Option<&str>,
        include_accepted_tx_ids: bool,
    ) -> Result<GetChainFromBlockResponse, RpcError> {
        let params = serde_json::json!({
            "startHash": start_hash,
            "includeAcceptedTxIds": include_accepted_tx_ids,
        });
        self.call("getChainFromBlock", params).await
    }

    async fn get_subnetwork(&self, subnetwork_id: &str) -> Result<SubnetworkResponse, RpcError> {
        let params = serde_json::json!({ "subnetworkId": subnetwork_id });
        self.call("getSubnetwork", params).await
    }
}

#[async_trait]
impl NotificationApi for RpcClient {
    async fn subscribe(&self) -> Result<Notifications, RpcError> {
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| RpcError::Network(format!("WebSocket connection failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        // Notifications that arrive before the last acknowledgement
        let mut early = Vec::new();
        for method in ["notifyBlocks", "notifyChainChanges"] {
            let (id, request_json) = self.next_request(method, serde_json::json!({}))?;
            write
                .send(Message::Text(request_json))
                .await
                .map_err(|e| RpcError::Network(format!("Send failed: {}", e)))?;
            await_ack(&mut read, id, &mut early).await?;
        }

        let (block_added_tx, block_added) = mpsc::channel(1);
        let (chain_changed_tx, chain_changed) = mpsc::channel(1);
        info!("Subscribed to block and chain notifications at {}", self.url);

        tokio::spawn(async move {
            // Keeps the sink alive so pong replies can be flushed
            let _write = write;
            for text in early {
                if !forward(&text, &block_added_tx, &chain_changed_tx).await {
                    return;
                }
            }
            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(frame)) => {
                        warn!("Notification stream closed by peer: {:?}", frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("Notification stream error: {}", e);
                        break;
                    }
                };
                if !forward(&text, &block_added_tx, &chain_changed_tx).await {
                    break;
                }
            }
        });

        Ok(Notifications { block_added, chain_changed })
    }
}

/// Reads frames until the response to request `id`, keeping notifications
/// received meanwhile in `early`.
async fn await_ack<S>(read: &mut S, id: u64, early: &mut Vec<String>) -> Result<(), RpcError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = read.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(RpcError::Network(format!("WebSocket error: {}", e))),
        };
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| RpcError::Internal(format!("Invalid frame: {}", e)))?;
        if value.get("method").is_some() {
            early.push(text);
            continue;
        }

        let response: JsonRpcResponse =
            serde_json::from_value(value).map_err(|e| RpcError::Internal(format!("Invalid response: {}", e)))?;
        if response.id != Some(id) {
            continue;
        }
        return match response.error {
            Some(error) => Err(RpcError::Rpc { code: error.code, message: error.message }),
            None => Ok(()),
        };
    }
    Err(RpcError::Network("Connection closed before subscription was acknowledged".to_string()))
}

/// Routes one frame to its channel. Returns false when the reader must stop,
/// which closes both channels.
async fn forward(
    text: &str,
    block_added: &mpsc::Sender<BlockAddedNotification>,
    chain_changed: &mpsc::Sender<ChainChangedNotification>,
) -> bool {
    let delivered = match route_notification(text) {
        Ok(Some(Routed::BlockAdded(notification))) => block_added.send(notification).await.is_ok(),
        Ok(Some(Routed::ChainChanged(notification))) => chain_changed.send(notification).await.is_ok(),
        Ok(None) => true,
        Err(e) => {
            error!("Closing notification stream on bad frame: {}", e);
            return false;
        }
    };
    if !delivered {
        debug!("Notification receiver dropped, stopping reader");
    }
    delivered
}

#[derive(Debug, PartialEq)]
enum Routed {
    BlockAdded(BlockAddedNotification),
    ChainChanged(ChainChangedNotification),
}

/// Classifies one inbound websocket text frame.
fn route_notification(text: &str) -> Result<Option<Routed>, RpcError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| RpcError::Internal(format!("Invalid frame: {}", e)))?;

    if value.get("method").is_none() {
        // Acknowledgement of a notify request
        let response: JsonRpcResponse =
            serde_json::from_value(value).map_err(|e| RpcError::Internal(format!("Invalid response: {}", e)))?;
        if let Some(error) = response.error {
            return Err(RpcError::Rpc { code: error.code, message: error.message });
        }
        return Ok(None);
    }

    let notification: JsonRpcNotification =
        serde_json::from_value(value).map_err(|e| RpcError::Internal(format!("Invalid notification: {}", e)))?;
    let parse_error = |e: serde_json::Error| RpcError::Internal(format!("Invalid {} params: {}", notification.method, e));

    match notification.method.as_str() {
        BLOCK_ADDED_METHOD => serde_json::from_value(notification.params.clone())
            .map(|n| Some(Routed::BlockAdded(n)))
            .map_err(parse_error),
        CHAIN_CHANGED_METHOD => serde_json::from_value(notification.params.clone())
            .map(|n| Some(Routed::ChainChanged(n)))
            .map_err(parse_error),
        other => {
            debug!("Ignoring notification {}", other);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    fn ack(id: u64) -> String {
        format!(r#"{{"jsonrpc":"2.0","id":{},"result":null}}"#, id)
    }

    fn reject(id: u64) -> String {
        format!(r#"{{"jsonrpc":"2.0","id":{},"error":{{"code":-32601,"message":"notifications disabled"}}}}"#, id)
    }

    /// Serves one websocket connection: answers each subscribe request with
    /// `reply`, sends `frames`, then keeps the socket open until the returned
    /// sender is dropped.
    async fn notification_peer(reply: fn(u64) -> String, frames: Vec<&'static str>) -> (String, oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (done_tx, done_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for _ in 0..2 {
                let Some(Ok(Message::Text(request))) = ws.next().await else {
                    return;
                };
                let request: serde_json::Value = serde_json::from_str(&request).unwrap();
                let id = request["id"].as_u64().unwrap();
                ws.send(Message::Text(reply(id))).await.unwrap();
            }
            for frame in frames {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
            let _ = done_rx.await;
        });

        (url, done_tx)
    }

    #[tokio::test]
    async fn test_subscribe_delivers_notifications() {
        let (url, _done) = notification_peer(
            ack,
            vec![
                r#"{"jsonrpc":"2.0","method":"blockAdded","params":{"hash":"next"}}"#,
                r#"{"jsonrpc":"2.0","method":"chainChanged","params":{"removedChainBlockHashes":[],"addedChainBlocks":[{"hash":"next"}]}}"#,
            ],
        )
        .await;
        let client = RpcClient::new(&url).unwrap();
        let mut notifications = client.subscribe().await.unwrap();

        let block = timeout(Duration::from_secs(5), notifications.block_added.recv()).await.unwrap();
        assert_eq!(block, Some(BlockAddedNotification { hash: "next".into() }));
        let chain = timeout(Duration::from_secs(5), notifications.chain_changed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chain.added_chain_blocks[0].hash, "next");
    }

    #[tokio::test]
    async fn test_malformed_chain_change_closes_stream() {
        let (url, _done) = notification_peer(
            ack,
            vec![
                r#"{"jsonrpc":"2.0","method":"chainChanged","params":{"removedChainBlockHashes":"oops"}}"#,
                r#"{"jsonrpc":"2.0","method":"blockAdded","params":{"hash":"next"}}"#,
            ],
        )
        .await;
        let client = RpcClient::new(&url).unwrap();
        let mut notifications = client.subscribe().await.unwrap();

        // The peer connection is still open, so None means the reader gave up
        let chain = timeout(Duration::from_secs(5), notifications.chain_changed.recv()).await.unwrap();
        assert!(chain.is_none());
        let block = timeout(Duration::from_secs(5), notifications.block_added.recv()).await.unwrap();
        assert!(block.is_none());
    }

    #[tokio::test]
    async fn test_rejected_subscription_fails_subscribe() {
        let (url, _done) = notification_peer(reject, Vec::new()).await;
        let client = RpcClient::new(&url).unwrap();

        match client.subscribe().await {
            Err(RpcError::Rpc { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "notifications disabled");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("subscription should have been rejected"),
        }
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RpcClient::new("not a url").is_err());
        assert!(RpcClient::new("ws://127.0.0.1:16110").is_ok());
    }

    #[test]
    fn test_request_ids_increase() {
        let client = RpcClient::new("ws://127.0.0.1:16110").unwrap();
        let (first, json) = client.next_request("getBlocks", serde_json::json!({"lowHash": null})).unwrap();
        let (second, _) = client.next_request("getBlocks", serde_json::json!({})).unwrap();
        assert_eq!(second, first + 1);
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
    }

    #[test]
    fn test_route_notifications() {
        let block = r#"{"jsonrpc":"2.0","method":"blockAdded","params":{"hash":"abc"}}"#;
        assert_eq!(
            route_notification(block).unwrap(),
            Some(Routed::BlockAdded(BlockAddedNotification { hash: "abc".into() }))
        );

        let chain = r#"{"jsonrpc":"2.0","method":"chainChanged","params":{
            "removedChainBlockHashes":["x"],
            "addedChainBlocks":[{"hash":"y","acceptedBlocks":[{"hash":"y","acceptedTxIds":["t"]}]}]}}"#;
        match route_notification(chain).unwrap() {
            Some(Routed::ChainChanged(n)) => {
                assert_eq!(n.removed_chain_block_hashes, vec!["x".to_string()]);
                assert_eq!(n.added_chain_blocks[0].accepted_blocks[0].accepted_tx_ids, vec!["t".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(route_notification(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap(), None);
        assert!(route_notification(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-1,"message":"no"}}"#).is_err());
        assert!(route_notification(r#"{"jsonrpc":"2.0","method":"blockAdded","params":{}}"#).is_err());
    }
}

//! RPC API trait definitions

use async_trait::async_trait;
use tokio::sync::mpsc;
use crate::model::*;

/// Request/response calls the sync engine makes against a full node.
#[async_trait]
pub trait RpcApi: Send + Sync {
    /// Pages forward through the DAG starting after `low_hash` (from genesis when `None`).
    async fn get_blocks(&self, low_hash: Option<&str>, include_raw: bool, include_verbose: bool) -> Result<GetBlocksResponse, RpcError>;
    async fn get_block(&self, hash: &str, include_raw: bool, include_verbose: bool) -> Result<GetBlockResponse, RpcError>;
    /// Pages forward through selected parent chain history starting after `start_hash`.
    async fn get_chain_from_block(&self, start_hash: Option<&str>, include_accepted_tx_ids: bool) -> Result<GetChainFromBlockResponse, RpcError>;
    async fn get_subnetwork(&self, subnetwork_id: &str) -> Result<SubnetworkResponse, RpcError>;
}

/// Inbound event channels fed by the peer's notification stream.
///
/// Both channels are bounded, so a slow consumer stalls delivery instead of
/// dropping events.
pub struct Notifications {
    pub block_added: mpsc::Receiver<BlockAddedNotification>,
    pub chain_changed: mpsc::Receiver<ChainChangedNotification>,
}

/// Notification API for streaming events
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Registers for block-added and chain-changed notifications.
    async fn subscribe(&self) -> Result<Notifications, RpcError>;
}

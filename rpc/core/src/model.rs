//! RPC data models and types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RPC error type
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum RpcError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },
}

pub const NATIVE_SUBNETWORK_ID: &str = "0000000000000000000000000000000000000000";
pub const COINBASE_SUBNETWORK_ID: &str = "0100000000000000000000000000000000000000";
pub const REGISTRY_SUBNETWORK_ID: &str = "0200000000000000000000000000000000000000";

/// Builtin subnetworks have no gas limit and are not registered on the node.
pub fn is_builtin_subnetwork(subnetwork_id: &str) -> bool {
    matches!(subnetwork_id, NATIVE_SUBNETWORK_ID | COINBASE_SUBNETWORK_ID | REGISTRY_SUBNETWORK_ID)
}

/// Verbose block data as computed by the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockVerboseData {
    pub hash: String,
    pub version: i32,
    pub hash_merkle_root: String,
    #[serde(rename = "acceptedIDMerkleRoot")]
    pub accepted_id_merkle_root: String,
    pub utxo_commitment: String,
    /// Block time in seconds
    pub time: i64,
    pub nonce: u64,
    /// Compact difficulty target, hex encoded
    pub bits: String,
    #[serde(default)]
    pub parent_hashes: Vec<String>,
    #[serde(default)]
    pub accepted_block_hashes: Vec<String>,
    pub blue_score: u64,
    #[serde(default)]
    pub mass: u64,
    #[serde(default, rename = "rawTx")]
    pub raw_txs: Vec<TransactionVerboseData>,
}

/// Verbose transaction data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionVerboseData {
    /// Serialized transaction, hex encoded
    pub hex: String,
    #[serde(rename = "txId")]
    pub tx_id: String,
    pub hash: String,
    pub version: i32,
    pub lock_time: u64,
    pub subnetwork: String,
    #[serde(default)]
    pub gas: u64,
    #[serde(default)]
    pub payload_hash: String,
    /// Payload, hex encoded
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub vin: Vec<Vin>,
    #[serde(default)]
    pub vout: Vec<Vout>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vin {
    #[serde(rename = "txId")]
    pub tx_id: String,
    pub vout: u32,
    pub script_sig: ScriptSig,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSig {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vout {
    pub value: u64,
    pub n: u32,
    pub script_pub_key: ScriptPubKeyResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptPubKeyResult {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
    #[serde(default, rename = "type")]
    pub script_type: String,
    #[serde(default)]
    pub address: Option<String>,
}

/// Get blocks response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlocksResponse {
    pub block_hashes: Vec<String>,
    #[serde(default)]
    pub block_hexes: Vec<String>,
    #[serde(default)]
    pub block_verbose_data: Vec<BlockVerboseData>,
}

/// Get block response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlockResponse {
    #[serde(default)]
    pub block_hex: Option<String>,
    #[serde(default)]
    pub block_verbose_data: Option<BlockVerboseData>,
}

/// A block merged by a chain block, together with the transactions it contributed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedBlock {
    pub hash: String,
    #[serde(default, rename = "acceptedTxIds")]
    pub accepted_tx_ids: Vec<String>,
}

/// A block added to the selected parent chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBlock {
    pub hash: String,
    #[serde(default)]
    pub accepted_blocks: Vec<AcceptedBlock>,
}

/// Get chain from block response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChainFromBlockResponse {
    #[serde(default)]
    pub removed_chain_block_hashes: Vec<String>,
    #[serde(default)]
    pub added_chain_blocks: Vec<ChainBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetworkResponse {
    #[serde(default)]
    pub gas_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockAddedNotification {
    pub hash: String,
}

/// Selected parent chain change, reported atomically for one reorg
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainChangedNotification {
    #[serde(default)]
    pub removed_chain_block_hashes: Vec<String>,
    #[serde(default)]
    pub added_chain_blocks: Vec<ChainBlock>,
}

impl From<GetChainFromBlockResponse> for ChainChangedNotification {
    fn from(response: GetChainFromBlockResponse) -> Self {
        Self {
            removed_chain_block_hashes: response.removed_chain_block_hashes,
            added_chain_blocks: response.added_chain_blocks,
        }
    }
}

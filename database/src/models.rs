//! Row types for the ledger tables

use serde::Serialize;
use sqlx::FromRow;

/// Bit-casts a u64 quantity to the signed form SQLite stores.
pub fn to_db_u64(value: u64) -> i64 {
    value as i64
}

/// Inverse of [`to_db_u64`].
pub fn from_db_u64(value: i64) -> u64 {
    value as u64
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Block {
    pub id: i64,
    pub block_hash: String,
    pub version: i32,
    pub hash_merkle_root: String,
    pub accepted_id_merkle_root: String,
    pub utxo_commitment: String,
    pub timestamp: i64,
    pub bits: i64,
    pub nonce: i64,
    pub blue_score: i64,
    pub is_chain_block: bool,
    pub accepting_block_id: Option<i64>,
    pub mass: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub block_hash: String,
    pub version: i32,
    pub hash_merkle_root: String,
    pub accepted_id_merkle_root: String,
    pub utxo_commitment: String,
    pub timestamp: i64,
    pub bits: u32,
    pub nonce: u64,
    pub blue_score: u64,
    pub is_chain_block: bool,
    pub mass: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParentBlock {
    pub block_id: i64,
    pub parent_block_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcceptedBlock {
    pub block_id: i64,
    pub accepted_block_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub block_id: i64,
    pub block_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Subnetwork {
    pub id: i64,
    pub subnetwork_id: String,
    pub gas_limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubnetwork {
    pub subnetwork_id: String,
    pub gas_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub transaction_id: String,
    pub transaction_hash: String,
    pub lock_time: i64,
    pub subnetwork_id: i64,
    pub gas: i64,
    pub payload_hash: String,
    pub payload: Vec<u8>,
    pub mass: i64,
    pub version: i32,
    pub accepting_block_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub transaction_id: String,
    pub transaction_hash: String,
    pub lock_time: u64,
    pub subnetwork_id: i64,
    pub gas: u64,
    pub payload_hash: String,
    pub payload: Vec<u8>,
    pub mass: u64,
    pub version: i32,
}

/// Position of a transaction inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionBlock {
    pub transaction_id: i64,
    pub block_id: i64,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub transaction_id: i64,
    pub transaction_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransactionOutput {
    pub transaction_id: i64,
    pub index: u32,
    pub value: u64,
    pub script_pub_key: Vec<u8>,
    pub address_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransactionInput {
    pub transaction_id: i64,
    pub previous_transaction_output_id: i64,
    pub index: u32,
    pub signature_script: Vec<u8>,
    pub sequence: u64,
}

/// Reference to an output by creating transaction ID and index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outpoint {
    pub transaction_id: String,
    pub index: u32,
}

impl Outpoint {
    pub fn new(transaction_id: impl Into<String>, index: u32) -> Self {
        Self { transaction_id: transaction_id.into(), index }
    }
}

impl std::fmt::Display for Outpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.index)
    }
}

/// Stored output located by outpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOutput {
    pub id: i64,
    pub outpoint: Outpoint,
    pub script_pub_key: Vec<u8>,
    pub is_spent: bool,
}

/// Output consumed by an input, as seen by acceptance bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentOutput {
    pub output_id: i64,
    pub outpoint: Outpoint,
    pub is_spent: bool,
}

/// Transaction with the previous output of each of its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionWithInputs {
    pub id: i64,
    pub transaction_id: String,
    pub previous_outputs: Vec<SpentOutput>,
}

// Read projections

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub block_hash: String,
    pub version: i32,
    pub hash_merkle_root: String,
    pub accepted_id_merkle_root: String,
    pub utxo_commitment: String,
    pub timestamp: i64,
    pub bits: u32,
    pub nonce: u64,
    pub parent_block_hashes: Vec<String>,
    pub blue_score: u64,
    pub is_chain_block: bool,
    pub accepting_block_hash: Option<String>,
    pub mass: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub transaction_id: String,
    pub transaction_hash: String,
    pub accepting_block_hash: Option<String>,
    pub accepting_block_blue_score: Option<u64>,
    pub subnetwork_id: String,
    pub lock_time: u64,
    pub gas: u64,
    pub payload_hash: String,
    /// Hex encoded
    pub payload: String,
    pub mass: u64,
    pub version: i32,
    pub inputs: Vec<InputSummary>,
    pub outputs: Vec<OutputSummary>,
}

impl TransactionSummary {
    /// Unique addresses touched by the transaction, inputs first.
    pub fn addresses(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.inputs
            .iter()
            .filter_map(|input| input.address.as_deref())
            .chain(self.outputs.iter().filter_map(|output| output.address.as_deref()))
            .filter(|address| seen.insert(*address))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSummary {
    pub previous_transaction_id: String,
    pub previous_transaction_output_index: u32,
    /// Hex encoded
    pub signature_script: String,
    pub sequence: u64,
    pub address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSummary {
    pub index: u32,
    pub value: u64,
    /// Hex encoded
    pub script_pub_key: String,
    pub address: Option<String>,
    pub is_spent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoSummary {
    pub transaction_id: String,
    pub index: u32,
    pub value: u64,
    /// Hex encoded
    pub script_pub_key: String,
    pub accepting_block_hash: Option<String>,
    pub accepting_block_blue_score: Option<u64>,
}

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dag_syncd::notifications::Publisher;
use dag_syncd::SyncError;
use database::Database;
use rpc_core::*;
use tempfile::TempDir;

pub const PAGE_SIZE: usize = 2;

/// In-memory node. Blocks are served in insertion order, chain pages by
/// start hash.
#[derive(Default)]
pub struct MockPeer {
    blocks: Mutex<Vec<BlockVerboseData>>,
    chain_pages: Mutex<HashMap<Option<String>, GetChainFromBlockResponse>>,
    fetches: Mutex<Vec<String>>,
    subnetwork_requests: Mutex<Vec<String>>,
}

impl MockPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_block(&self, block: BlockVerboseData) {
        self.blocks.lock().unwrap().push(block);
    }

    pub fn set_chain_page(&self, start: Option<&str>, removed: &[&str], added: Vec<ChainBlock>) {
        self.chain_pages.lock().unwrap().insert(
            start.map(str::to_string),
            GetChainFromBlockResponse {
                removed_chain_block_hashes: removed.iter().map(|hash| hash.to_string()).collect(),
                added_chain_blocks: added,
            },
        );
    }

    /// Hashes requested through `get_block`, in request order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn subnetwork_requests(&self) -> Vec<String> {
        self.subnetwork_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcApi for MockPeer {
    async fn get_blocks(
        &self,
        low_hash: Option<&str>,
        _include_raw: bool,
        _include_verbose: bool,
    ) -> Result<GetBlocksResponse, RpcError> {
        let blocks = self.blocks.lock().unwrap();
        let start = match low_hash {
            None => 0,
            Some(hash) => match blocks.iter().position(|block| block.hash == hash) {
                Some(position) => position + 1,
                None => return Err(RpcError::Rpc { code: -5, message: format!("block {} not found", hash) }),
            },
        };
        let page: Vec<BlockVerboseData> = blocks.iter().skip(start).take(PAGE_SIZE).cloned().collect();
        Ok(GetBlocksResponse {
            block_hashes: page.iter().map(|block| block.hash.clone()).collect(),
            block_hexes: page.iter().map(|_| "deadbeef".to_string()).collect(),
            block_verbose_data: page,
        })
    }

    async fn get_block(&self, hash: &str, _include_raw: bool, _include_verbose: bool) -> Result<GetBlockResponse, RpcError> {
        self.fetches.lock().unwrap().push(hash.to_string());
        let blocks = self.blocks.lock().unwrap();
        let block = blocks
            .iter()
            .find(|block| block.hash == hash)
            .cloned()
            .ok_or_else(|| RpcError::Rpc { code: -5, message: format!("block {} not found", hash) })?;
        Ok(GetBlockResponse { block_hex: Some("deadbeef".to_string()), block_verbose_data: Some(block) })
    }

    async fn get_chain_from_block(
        &self,
        start_hash: Option<&str>,
        _include_accepted_tx_ids: bool,
    ) -> Result<GetChainFromBlockResponse, RpcError> {
        let pages = self.chain_pages.lock().unwrap();
        Ok(pages.get(&start_hash.map(str::to_string)).cloned().unwrap_or_default())
    }

    async fn get_subnetwork(&self, subnetwork_id: &str) -> Result<SubnetworkResponse, RpcError> {
        self.subnetwork_requests.lock().unwrap().push(subnetwork_id.to_string());
        Ok(SubnetworkResponse { gas_limit: Some(250_000) })
    }
}

/// Records every publish; optionally fails all of them.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { fail: true, ..Default::default() })
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages.lock().unwrap().iter().map(|(topic, _)| topic.clone()).collect()
    }

    pub fn payloads(&self, topic: &str) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| serde_json::from_str(payload).unwrap())
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> dag_syncd::Result<()> {
        if self.fail {
            return Err(SyncError::Publish(format!("{}: connection refused", topic)));
        }
        self.messages.lock().unwrap().push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

pub async fn temp_database() -> (TempDir, Arc<Database>) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("ledger.db")).await.unwrap();
    db.migrate().await.unwrap();
    (dir, Arc::new(db))
}

pub fn address(name: &str) -> String {
    format!("kaspa:{}", name)
}

/// Pay-to-pubkey script: push 32 bytes, OP_CHECKSIG.
pub fn p2pk_script() -> String {
    format!("20{}ac", "11".repeat(32))
}

pub fn block(hash: &str, parents: &[&str], blue_score: u64, txs: Vec<TransactionVerboseData>) -> BlockVerboseData {
    BlockVerboseData {
        hash: hash.to_string(),
        version: 1,
        hash_merkle_root: format!("merkle-{}", hash),
        accepted_id_merkle_root: format!("accepted-{}", hash),
        utxo_commitment: format!("utxo-{}", hash),
        time: 1_600_000_000 + blue_score as i64,
        nonce: blue_score,
        bits: "207fffff".to_string(),
        parent_hashes: parents.iter().map(|parent| parent.to_string()).collect(),
        accepted_block_hashes: Vec::new(),
        blue_score,
        mass: 0,
        raw_txs: txs,
    }
}

fn output(n: u32, owner: &str, value: u64) -> Vout {
    Vout {
        value,
        n,
        script_pub_key: ScriptPubKeyResult {
            asm: String::new(),
            hex: p2pk_script(),
            script_type: "pubkey".to_string(),
            address: Some(address(owner)),
        },
    }
}

pub fn coinbase(tx_id: &str, owner: &str, value: u64) -> TransactionVerboseData {
    TransactionVerboseData {
        hex: "0100000000".to_string(),
        tx_id: tx_id.to_string(),
        hash: format!("hash-{}", tx_id),
        version: 1,
        lock_time: 0,
        subnetwork: COINBASE_SUBNETWORK_ID.to_string(),
        gas: 0,
        payload_hash: String::new(),
        payload: "00".to_string(),
        vin: Vec::new(),
        vout: vec![output(0, owner, value)],
    }
}

/// Native transaction spending `inputs` and paying `outputs` as `(owner, value)`.
pub fn spend(tx_id: &str, inputs: &[(&str, u32)], outputs: &[(&str, u64)]) -> TransactionVerboseData {
    TransactionVerboseData {
        hex: "0100000001".to_string(),
        tx_id: tx_id.to_string(),
        hash: format!("hash-{}", tx_id),
        version: 1,
        lock_time: 0,
        subnetwork: NATIVE_SUBNETWORK_ID.to_string(),
        gas: 0,
        payload_hash: String::new(),
        payload: String::new(),
        vin: inputs
            .iter()
            .map(|(previous, index)| Vin {
                tx_id: previous.to_string(),
                vout: *index,
                script_sig: ScriptSig { asm: String::new(), hex: format!("40{}", "22".repeat(64)) },
                sequence: u64::MAX,
            })
            .collect(),
        vout: outputs
            .iter()
            .enumerate()
            .map(|(n, (owner, value))| output(n as u32, owner, *value))
            .collect(),
    }
}

pub fn chain_block(hash: &str, accepted: &[(&str, &[&str])]) -> ChainBlock {
    ChainBlock {
        hash: hash.to_string(),
        accepted_blocks: accepted
            .iter()
            .map(|(accepted_hash, tx_ids)| AcceptedBlock {
                hash: accepted_hash.to_string(),
                accepted_tx_ids: tx_ids.iter().map(|id| id.to_string()).collect(),
            })
            .collect(),
    }
}

pub fn chain_changed(removed: &[&str], added: Vec<ChainBlock>) -> ChainChangedNotification {
    ChainChangedNotification {
        removed_chain_block_hashes: removed.iter().map(|hash| hash.to_string()).collect(),
        added_chain_blocks: added,
    }
}

/// g <- a <- {b, c}. `b` and `c` both spend the coinbase output of `a`;
/// the peer reports g, a, b as the selected parent chain.
pub fn reorg_peer() -> Arc<MockPeer> {
    let peer = MockPeer::new();
    peer.add_block(block("g", &[], 0, vec![coinbase("cb-g", "miner", 100)]));
    peer.add_block(block("a", &["g"], 1, vec![coinbase("cb-a", "alice", 50)]));
    peer.add_block(block(
        "b",
        &["a"],
        2,
        vec![coinbase("cb-b", "miner", 50), spend("t1", &[("cb-a", 0)], &[("bob", 30), ("bob", 20)])],
    ));
    peer.add_block(block(
        "c",
        &["a"],
        2,
        vec![coinbase("cb-c", "miner", 50), spend("t2", &[("cb-a", 0)], &[("carol", 50)])],
    ));
    peer.set_chain_page(
        Some("g"),
        &[],
        vec![
            chain_block("a", &[("g", &["cb-g"])]),
            chain_block("b", &[("a", &["cb-a"]), ("b", &["cb-b", "t1"])]),
        ],
    );
    peer
}

pub async fn count(db: &Database, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(db.pool())
        .await
        .unwrap()
}

pub async fn is_stored(db: &Database, hash: &str) -> bool {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM blocks WHERE block_hash = ?")
        .bind(hash)
        .fetch_optional(db.pool())
        .await
        .unwrap();
    found.is_some()
}

pub async fn is_chain_block(db: &Database, hash: &str) -> bool {
    sqlx::query_scalar("SELECT is_chain_block FROM blocks WHERE block_hash = ?")
        .bind(hash)
        .fetch_one(db.pool())
        .await
        .unwrap()
}

/// Hash of the block accepting block `hash`.
pub async fn block_accepted_by(db: &Database, hash: &str) -> Option<String> {
    sqlx::query_scalar(
        "SELECT a.block_hash FROM blocks b LEFT JOIN blocks a ON a.id = b.accepting_block_id WHERE b.block_hash = ?",
    )
    .bind(hash)
    .fetch_one(db.pool())
    .await
    .unwrap()
}

/// Hash of the block accepting transaction `tx_id`.
pub async fn transaction_accepted_by(db: &Database, tx_id: &str) -> Option<String> {
    sqlx::query_scalar(
        "SELECT a.block_hash FROM transactions t LEFT JOIN blocks a ON a.id = t.accepting_block_id \
         WHERE t.transaction_id = ?",
    )
    .bind(tx_id)
    .fetch_one(db.pool())
    .await
    .unwrap()
}

pub async fn is_spent(db: &Database, tx_id: &str, index: u32) -> bool {
    sqlx::query_scalar(
        "SELECT o.is_spent FROM transaction_outputs o JOIN transactions t ON t.id = o.transaction_id \
         WHERE t.transaction_id = ? AND o.idx = ?",
    )
    .bind(tx_id)
    .bind(index as i64)
    .fetch_one(db.pool())
    .await
    .unwrap()
}

/// Outputs whose spent flag disagrees with "spent by a transaction accepted
/// by a current chain block".
pub async fn spent_mismatches(db: &Database) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM transaction_outputs o WHERE o.is_spent != EXISTS ( \
             SELECT 1 FROM transaction_inputs i \
             JOIN transactions t ON t.id = i.transaction_id \
             JOIN blocks a ON a.id = t.accepting_block_id \
             WHERE i.previous_transaction_output_id = o.id AND a.is_chain_block)",
    )
    .fetch_one(db.pool())
    .await
    .unwrap()
}

/// Chain flags, acceptance and spent state of the whole store.
pub async fn acceptance_snapshot(db: &Database) -> Vec<(String, bool, Option<i64>)> {
    let mut rows: Vec<(String, bool, Option<i64>)> = sqlx::query_as(
        "SELECT 'block:' || block_hash, is_chain_block, accepting_block_id FROM blocks \
         UNION ALL SELECT 'tx:' || transaction_id, FALSE, accepting_block_id FROM transactions \
         UNION ALL SELECT 'output:' || o.id, o.is_spent, NULL FROM transaction_outputs o",
    )
    .fetch_all(db.pool())
    .await
    .unwrap();
    rows.sort();
    rows
}

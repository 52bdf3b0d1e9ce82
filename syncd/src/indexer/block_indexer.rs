//! Block ingestion

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use database::models::{AcceptedBlock, NewBlock, ParentBlock, RawBlock, TransactionBlock};
use database::stores::{BlockStore, TransactionStore};
use database::SqliteConnection;
use rpc_core::{BlockVerboseData, RpcApi};
use tracing::{debug, trace};

use super::ancestors::AncestorResolver;
use super::transaction_indexer::TransactionIndexer;
use super::{fetch_block, BlockData};
use crate::error::{Result, SyncError};

/// What an ingest added to the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// Newly stored blocks, parents before children
    pub block_hashes: Vec<String>,
    /// Row IDs of newly stored transactions
    pub transaction_ids: Vec<i64>,
}

impl IngestSummary {
    pub fn is_empty(&self) -> bool {
        self.block_hashes.is_empty() && self.transaction_ids.is_empty()
    }
}

pub struct BlockIndexer {
    rpc: Arc<dyn RpcApi>,
    resolver: AncestorResolver,
    transactions: TransactionIndexer,
}

impl BlockIndexer {
    pub fn new(rpc: Arc<dyn RpcApi>) -> Self {
        Self {
            resolver: AncestorResolver::new(rpc.clone()),
            transactions: TransactionIndexer::new(rpc.clone()),
            rpc,
        }
    }

    pub async fn fetch_block(&self, hash: &str) -> Result<BlockData> {
        fetch_block(self.rpc.as_ref(), hash).await
    }

    /// Resolves missing ancestors of every block in `blocks`, then ingests
    /// ancestors and blocks together. The batch counts as staged, so a block
    /// whose parent is elsewhere in the batch needs no fetch.
    pub async fn add_blocks(&self, conn: &mut SqliteConnection, blocks: Vec<BlockData>) -> Result<IngestSummary> {
        let mut staged: HashSet<String> = blocks.iter().map(|block| block.hash().to_string()).collect();
        let mut ordered = Vec::with_capacity(blocks.len());
        for block in blocks {
            let ancestors = self.resolver.missing_ancestors(conn, &block, &staged).await?;
            for ancestor in ancestors {
                staged.insert(ancestor.hash().to_string());
                ordered.push(ancestor);
            }
            ordered.push(block);
        }
        self.ingest(conn, &ordered).await
    }

    /// Stores `blocks` and their transactions. Blocks already stored, or
    /// repeated within the batch, are skipped. Parents of every new block
    /// must be stored or part of the batch.
    pub async fn ingest(&self, conn: &mut SqliteConnection, blocks: &[BlockData]) -> Result<IngestSummary> {
        let hashes: Vec<String> = blocks.iter().map(|block| block.hash().to_string()).collect();
        let existing = BlockStore::existing_hashes(conn, &hashes).await?;
        let mut seen: HashSet<&str> = HashSet::new();
        let new_blocks: Vec<&BlockData> = blocks
            .iter()
            .filter(|block| !existing.contains(block.hash()) && seen.insert(block.hash()))
            .collect();
        if new_blocks.is_empty() {
            debug!("All {} blocks already stored", blocks.len());
            return Ok(IngestSummary::default());
        }

        let transactions = self.transactions.index(conn, &new_blocks).await?;

        let rows = new_blocks
            .iter()
            .map(|block| new_block_row(&block.verbose))
            .collect::<Result<Vec<_>>>()?;
        BlockStore::insert(conn, &rows).await?;

        let referenced: Vec<String> = new_blocks
            .iter()
            .flat_map(|block| {
                std::iter::once(block.hash())
                    .chain(block.parent_hashes().iter().map(String::as_str))
                    .chain(block.verbose.accepted_block_hashes.iter().map(String::as_str))
            })
            .collect::<HashSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let block_ids = BlockStore::ids_by_hashes(conn, &referenced).await?;

        let mut parents = HashSet::new();
        let mut accepted = HashSet::new();
        let mut raw_blocks = Vec::with_capacity(new_blocks.len());
        let mut transaction_blocks = Vec::new();
        for block in &new_blocks {
            let block_id = lookup(&block_ids, block.hash(), "block", block.hash())?;
            for parent in block.parent_hashes() {
                let parent_block_id = lookup(&block_ids, parent, "parent", block.hash())?;
                parents.insert(ParentBlock { block_id, parent_block_id });
            }
            for accepted_hash in &block.verbose.accepted_block_hashes {
                let accepted_block_id = lookup(&block_ids, accepted_hash, "accepted block", block.hash())?;
                accepted.insert(AcceptedBlock { block_id, accepted_block_id });
            }
            raw_blocks.push(RawBlock { block_id, block_data: block.raw.clone() });
            for (index, tx) in block.verbose.raw_txs.iter().enumerate() {
                let transaction_id = lookup(&transactions.row_ids, &tx.tx_id, "transaction", block.hash())?;
                transaction_blocks.push(TransactionBlock { transaction_id, block_id, index: index as u32 });
            }
        }

        BlockStore::insert_parents(conn, &parents.into_iter().collect::<Vec<_>>()).await?;
        BlockStore::insert_accepted(conn, &accepted.into_iter().collect::<Vec<_>>()).await?;
        BlockStore::insert_raw(conn, &raw_blocks).await?;
        TransactionStore::insert_blocks(conn, &transaction_blocks).await?;

        for block in &new_blocks {
            trace!("Ingested block {} at blue score {}", block.hash(), block.verbose.blue_score);
        }
        debug!(
            "Ingested {} blocks and {} new transactions",
            new_blocks.len(),
            transactions.new_row_ids.len()
        );

        Ok(IngestSummary {
            block_hashes: new_blocks.iter().map(|block| block.hash().to_string()).collect(),
            transaction_ids: transactions.new_row_ids,
        })
    }
}

fn lookup(ids: &HashMap<String, i64>, key: &str, kind: &str, block_hash: &str) -> Result<i64> {
    ids.get(key)
        .copied()
        .ok_or_else(|| SyncError::Consistency(format!("{} {} of block {} is not stored", kind, key, block_hash)))
}

fn new_block_row(verbose: &BlockVerboseData) -> Result<NewBlock> {
    let bits = u32::from_str_radix(&verbose.bits, 16)
        .map_err(|e| SyncError::InvalidData(format!("block {} has invalid bits {}: {}", verbose.hash, verbose.bits, e)))?;
    let timestamp = DateTime::<Utc>::from_timestamp(verbose.time, 0)
        .ok_or_else(|| SyncError::InvalidData(format!("block {} has invalid time {}", verbose.hash, verbose.time)))?;

    Ok(NewBlock {
        block_hash: verbose.hash.clone(),
        version: verbose.version,
        hash_merkle_root: verbose.hash_merkle_root.clone(),
        accepted_id_merkle_root: verbose.accepted_id_merkle_root.clone(),
        utxo_commitment: verbose.utxo_commitment.clone(),
        timestamp: timestamp.timestamp(),
        bits,
        nonce: verbose.nonce,
        blue_score: verbose.blue_score,
        // Only genesis starts on the chain; everything else waits for a chain change
        is_chain_block: verbose.parent_hashes.is_empty(),
        mass: verbose.mass,
    })
}

//! Selected parent chain bookkeeping: chain flags, acceptance and spent state

use std::collections::HashSet;
use std::sync::Arc;

use database::models::Block;
use database::stores::{BlockStore, OutputStore, TransactionStore};
use database::SqliteConnection;
use rpc_core::ChainBlock;
use tracing::{debug, info};

use super::block_indexer::{BlockIndexer, IngestSummary};
use crate::error::{Result, SyncError};

/// Net effect of one applied chain change.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChainUpdate {
    pub removed_block_hashes: Vec<String>,
    pub added_blocks: Vec<ChainBlock>,
    /// Row IDs of transactions whose acceptance was cleared
    pub unaccepted_transaction_ids: Vec<i64>,
    /// Row IDs of transactions newly accepted
    pub accepted_transaction_ids: Vec<i64>,
    pub selected_tip: Option<String>,
}

pub struct ChainAcceptance {
    blocks: Arc<BlockIndexer>,
}

impl ChainAcceptance {
    pub fn new(blocks: Arc<BlockIndexer>) -> Self {
        Self { blocks }
    }

    /// Ingests every added chain block or accepted block the store lacks,
    /// then applies the change. Both happen on `conn`, so the caller's
    /// transaction covers them together.
    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        removed: &[String],
        added: &[ChainBlock],
    ) -> Result<(IngestSummary, ChainUpdate)> {
        let mut seen = HashSet::new();
        let referenced: Vec<String> = added
            .iter()
            .flat_map(|block| {
                std::iter::once(&block.hash).chain(block.accepted_blocks.iter().map(|accepted| &accepted.hash))
            })
            .filter(|hash| seen.insert(hash.as_str()))
            .cloned()
            .collect();

        let existing = BlockStore::existing_hashes(conn, &referenced).await?;
        let mut missing = Vec::new();
        for hash in referenced.iter().filter(|hash| !existing.contains(*hash)) {
            debug!("Chain change references unknown block {}, fetching", hash);
            missing.push(self.blocks.fetch_block(hash).await?);
        }
        let ingested = if missing.is_empty() {
            IngestSummary::default()
        } else {
            self.blocks.add_blocks(conn, missing).await?
        };

        let update = Self::apply(conn, removed, added).await?;
        Ok((ingested, update))
    }

    /// Unwinds each removed block in order, then accepts each added block in
    /// order. Any violated precondition is a consistency error.
    pub async fn apply(conn: &mut SqliteConnection, removed: &[String], added: &[ChainBlock]) -> Result<ChainUpdate> {
        let mut update = ChainUpdate {
            removed_block_hashes: removed.to_vec(),
            added_blocks: added.to_vec(),
            ..Default::default()
        };

        for hash in removed {
            Self::unwind(conn, hash, &mut update).await?;
        }
        for chain_block in added {
            Self::accept(conn, chain_block, &mut update).await?;
        }

        update.selected_tip = BlockStore::selected_tip(conn).await?.map(|block| block.block_hash);
        info!(
            "Chain changed: {} removed, {} added, {} transactions unaccepted, {} accepted",
            removed.len(),
            added.len(),
            update.unaccepted_transaction_ids.len(),
            update.accepted_transaction_ids.len()
        );
        Ok(update)
    }

    async fn unwind(conn: &mut SqliteConnection, hash: &str, update: &mut ChainUpdate) -> Result<()> {
        let block = load_block(conn, hash).await?;
        if !block.is_chain_block {
            return Err(SyncError::Consistency(format!(
                "block erroneously marked as not a chain block: {}",
                hash
            )));
        }

        let transactions = TransactionStore::accepted_by_block_id(conn, block.id).await?;
        let mut unspent = Vec::new();
        let mut touched = HashSet::new();
        for tx in &transactions {
            for previous in &tx.previous_outputs {
                if !previous.is_spent || !touched.insert(previous.output_id) {
                    return Err(SyncError::Consistency(format!(
                        "cannot de-spend an unspent transaction output: {} index: {}",
                        previous.outpoint.transaction_id, previous.outpoint.index
                    )));
                }
                unspent.push(previous.output_id);
            }
        }

        let transaction_ids: Vec<i64> = transactions.iter().map(|tx| tx.id).collect();
        OutputStore::set_spent(conn, &unspent, false).await?;
        TransactionStore::set_accepting_block(conn, &transaction_ids, None).await?;
        BlockStore::clear_accepted_by(conn, block.id).await?;
        BlockStore::set_is_chain_block(conn, block.id, false).await?;

        debug!("Unwound chain block {} ({} transactions)", hash, transaction_ids.len());
        update.unaccepted_transaction_ids.extend(transaction_ids);
        Ok(())
    }

    async fn accept(conn: &mut SqliteConnection, chain_block: &ChainBlock, update: &mut ChainUpdate) -> Result<()> {
        let block = load_block(conn, &chain_block.hash).await?;
        if block.is_chain_block {
            return Err(SyncError::Consistency(format!(
                "block erroneously marked as a chain block: {}",
                chain_block.hash
            )));
        }

        for accepted in &chain_block.accepted_blocks {
            let accepted_block = load_block(conn, &accepted.hash).await?;
            if accepted_block.accepting_block_id == Some(block.id) {
                return Err(SyncError::Consistency(format!(
                    "block {} erroneously marked as accepted by {}",
                    accepted.hash, chain_block.hash
                )));
            }

            let mut requested = HashSet::new();
            let transaction_ids: Vec<String> = accepted
                .accepted_tx_ids
                .iter()
                .filter(|id| requested.insert(id.as_str()))
                .cloned()
                .collect();
            let transactions =
                TransactionStore::by_ids_and_block_id(conn, &transaction_ids, accepted_block.id).await?;
            if transactions.len() != transaction_ids.len() {
                return Err(SyncError::Consistency(format!(
                    "some transactions are missing for block {}: expected {}, found {}",
                    accepted.hash,
                    transaction_ids.len(),
                    transactions.len()
                )));
            }

            let mut spent = Vec::new();
            let mut touched = HashSet::new();
            for tx in &transactions {
                for previous in &tx.previous_outputs {
                    if previous.is_spent || !touched.insert(previous.output_id) {
                        return Err(SyncError::Consistency(format!(
                            "cannot spend an already spent transaction output: {} index: {}",
                            previous.outpoint.transaction_id, previous.outpoint.index
                        )));
                    }
                    spent.push(previous.output_id);
                }
            }

            let row_ids: Vec<i64> = transactions.iter().map(|tx| tx.id).collect();
            OutputStore::set_spent(conn, &spent, true).await?;
            TransactionStore::set_accepting_block(conn, &row_ids, Some(block.id)).await?;
            BlockStore::set_accepting_block(conn, &[accepted_block.id], Some(block.id)).await?;
            update.accepted_transaction_ids.extend(row_ids);
        }

        BlockStore::set_is_chain_block(conn, block.id, true).await?;
        debug!(
            "Added chain block {} accepting {} blocks",
            chain_block.hash,
            chain_block.accepted_blocks.len()
        );
        Ok(())
    }
}

async fn load_block(conn: &mut SqliteConnection, hash: &str) -> Result<Block> {
    BlockStore::get_by_hash(conn, hash)
        .await?
        .ok_or_else(|| SyncError::Consistency(format!("block {} is not stored", hash)))
}

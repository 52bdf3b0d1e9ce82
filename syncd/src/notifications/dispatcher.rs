//! Turns committed ingests and chain changes into published events

use std::sync::Arc;

use database::models::TransactionSummary;
use database::queries::{BlockQueries, TransactionQueries};
use database::Database;
use serde::Serialize;
use tracing::debug;

use super::publisher::Publisher;
use super::{
    address_topic, ACCEPTED_TRANSACTIONS_TOPIC, BLOCKS_TOPIC, SELECTED_PARENT_CHAIN_TOPIC, SELECTED_TIP_TOPIC,
    TRANSACTIONS_TOPIC, UNACCEPTED_TRANSACTIONS_TOPIC,
};
use crate::error::{Result, SyncError};
use crate::indexer::{ChainUpdate, IngestSummary};
use crate::models::SelectedParentChainPayload;

/// Publishes projections read back from committed state. Without a
/// publisher every call returns immediately.
pub struct NotificationDispatcher {
    database: Arc<Database>,
    publisher: Option<Arc<dyn Publisher>>,
}

impl NotificationDispatcher {
    pub fn new(database: Arc<Database>, publisher: Option<Arc<dyn Publisher>>) -> Self {
        Self { database, publisher }
    }

    /// Blocks first, then the transactions they introduced.
    pub async fn blocks_added(&self, summary: &IngestSummary) -> Result<()> {
        let Some(publisher) = &self.publisher else {
            return Ok(());
        };
        if summary.is_empty() {
            return Ok(());
        }

        let mut ctx = self.database.context().await?;
        for hash in &summary.block_hashes {
            let block = BlockQueries::get_by_hash(ctx.conn(), hash)
                .await?
                .ok_or_else(|| SyncError::Consistency(format!("committed block {} is not readable", hash)))?;
            publish_json(publisher.as_ref(), BLOCKS_TOPIC, &block).await?;
        }

        let transactions = TransactionQueries::get_by_row_ids(ctx.conn(), &summary.transaction_ids).await?;
        publish_transactions(publisher.as_ref(), TRANSACTIONS_TOPIC, &transactions).await?;

        debug!(
            "Published {} blocks and {} transactions",
            summary.block_hashes.len(),
            transactions.len()
        );
        Ok(())
    }

    pub async fn chain_changed(&self, update: &ChainUpdate) -> Result<()> {
        let Some(publisher) = &self.publisher else {
            return Ok(());
        };

        let mut ctx = self.database.context().await?;
        // Some of these may already be re-accepted by this same change
        let unaccepted: Vec<TransactionSummary> =
            TransactionQueries::get_by_row_ids(ctx.conn(), &update.unaccepted_transaction_ids)
                .await?
                .into_iter()
                .map(|mut tx| {
                    tx.accepting_block_hash = None;
                    tx.accepting_block_blue_score = None;
                    tx
                })
                .collect();
        publish_transactions(publisher.as_ref(), UNACCEPTED_TRANSACTIONS_TOPIC, &unaccepted).await?;
        let accepted = TransactionQueries::get_by_row_ids(ctx.conn(), &update.accepted_transaction_ids).await?;
        publish_transactions(publisher.as_ref(), ACCEPTED_TRANSACTIONS_TOPIC, &accepted).await?;

        if let Some(tip) = &update.selected_tip {
            if let Some(block) = BlockQueries::get_by_hash(ctx.conn(), tip).await? {
                publish_json(publisher.as_ref(), SELECTED_TIP_TOPIC, &block).await?;
            }
        }

        let chain = SelectedParentChainPayload::new(&update.removed_block_hashes, &update.added_blocks);
        publish_json(publisher.as_ref(), SELECTED_PARENT_CHAIN_TOPIC, &chain).await
    }
}

async fn publish_transactions(publisher: &dyn Publisher, topic: &str, transactions: &[TransactionSummary]) -> Result<()> {
    for tx in transactions {
        let payload = serde_json::to_string(tx)?;
        publish(publisher, topic, &payload).await?;
        for address in tx.addresses() {
            publish(publisher, &address_topic(topic, address), &payload).await?;
        }
    }
    Ok(())
}

async fn publish_json<T: Serialize>(publisher: &dyn Publisher, topic: &str, value: &T) -> Result<()> {
    let payload = serde_json::to_string(value)?;
    publish(publisher, topic, &payload).await
}

async fn publish(publisher: &dyn Publisher, topic: &str, payload: &str) -> Result<()> {
    publisher.publish(topic, payload).await.map_err(|e| match e {
        SyncError::Publish(_) => e,
        other => SyncError::Publish(format!("{}: {}", topic, other)),
    })
}

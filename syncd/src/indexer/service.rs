//! Sync orchestration: bootstrap backfill followed by the notification loop

use std::sync::Arc;

use database::stores::BlockStore;
use database::Database;
use rpc_core::{ChainBlock, ChainChangedNotification, Notifications, RpcApi, RpcError};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::block_indexer::BlockIndexer;
use super::chain_acceptance::ChainAcceptance;
use super::pending::{feasibility, Feasibility, PendingChainChange, PendingChainChanges};
use super::BlockData;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::notifications::{NotificationDispatcher, Publisher};

pub struct IndexerService {
    database: Arc<Database>,
    rpc: Arc<dyn RpcApi>,
    blocks: Arc<BlockIndexer>,
    chain: ChainAcceptance,
    dispatcher: NotificationDispatcher,
    pending: PendingChainChanges,
}

impl IndexerService {
    pub fn new(
        database: Arc<Database>,
        rpc: Arc<dyn RpcApi>,
        publisher: Option<Arc<dyn Publisher>>,
        config: &SyncConfig,
    ) -> Self {
        let blocks = Arc::new(BlockIndexer::new(rpc.clone()));
        Self {
            chain: ChainAcceptance::new(blocks.clone()),
            dispatcher: NotificationDispatcher::new(database.clone(), publisher),
            pending: PendingChainChanges::new(config.max_pending_retries),
            database,
            rpc,
            blocks,
        }
    }

    /// Number of chain changes waiting for missing blocks.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Catches up with the peer: blocks first, then the selected parent chain.
    pub async fn bootstrap(&self) -> Result<()> {
        info!("Starting bootstrap");
        self.sync_blocks().await?;
        self.sync_selected_parent_chain().await?;
        info!("Bootstrap complete");
        Ok(())
    }

    async fn sync_blocks(&self) -> Result<()> {
        let mut cursor = {
            let mut ctx = self.database.context().await?;
            BlockStore::bluest(ctx.conn()).await?.map(|block| block.block_hash)
        };
        debug!("Syncing blocks after {:?}", cursor);

        loop {
            let response = self.rpc.get_blocks(cursor.as_deref(), true, true).await?;
            let blocks = BlockData::from_blocks_response(response)?;
            let Some(last) = blocks.last().map(|block| block.hash().to_string()) else {
                break;
            };

            let mut ctx = self.database.begin().await?;
            let summary = self.blocks.add_blocks(ctx.conn(), blocks).await?;
            ctx.commit().await?;
            info!(
                "Synced {} blocks with {} new transactions up to {}",
                summary.block_hashes.len(),
                summary.transaction_ids.len(),
                last
            );
            self.dispatcher.blocks_added(&summary).await?;
            cursor = Some(last);
        }
        Ok(())
    }

    async fn sync_selected_parent_chain(&self) -> Result<()> {
        let mut cursor = {
            let mut ctx = self.database.context().await?;
            BlockStore::selected_tip(ctx.conn()).await?.map(|block| block.block_hash)
        };
        debug!("Syncing selected parent chain after {:?}", cursor);

        loop {
            let response = self.rpc.get_chain_from_block(cursor.as_deref(), true).await?;
            if response.removed_chain_block_hashes.is_empty() && response.added_chain_blocks.is_empty() {
                break;
            }
            let next = response.added_chain_blocks.last().map(|block| block.hash.clone());
            self.apply_chain_change(&response.removed_chain_block_hashes, &response.added_chain_blocks)
                .await?;
            match next {
                Some(hash) => cursor = Some(hash),
                None => break,
            }
        }
        Ok(())
    }

    /// Serves notifications until `shutdown` fires. A closed notification
    /// stream ends the run with an error.
    pub async fn run(&mut self, mut notifications: Notifications, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("Waiting for notifications");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutdown requested, stopping sync");
                    return Ok(());
                }
                notification = notifications.block_added.recv() => match notification {
                    Some(notification) => self.on_block_added(&notification.hash).await?,
                    None => return Err(stream_closed("block added")),
                },
                notification = notifications.chain_changed.recv() => match notification {
                    Some(notification) => self.on_chain_changed(notification).await?,
                    None => return Err(stream_closed("chain changed")),
                },
            }
        }
    }

    /// Ingests a newly announced block with any ancestors the store lacks.
    pub async fn on_block_added(&self, hash: &str) -> Result<()> {
        let mut ctx = self.database.begin().await?;
        if BlockStore::exists(ctx.conn(), hash).await? {
            debug!("Block {} already stored", hash);
            return Ok(());
        }

        let block = self.blocks.fetch_block(hash).await?;
        let summary = self.blocks.add_blocks(ctx.conn(), vec![block]).await?;
        ctx.commit().await?;
        info!(
            "Added block {} ({} blocks, {} new transactions)",
            hash,
            summary.block_hashes.len(),
            summary.transaction_ids.len()
        );
        self.dispatcher.blocks_added(&summary).await
    }

    /// Queues the change, then applies every queued change that has become
    /// feasible, oldest first.
    pub async fn on_chain_changed(&mut self, notification: ChainChangedNotification) -> Result<()> {
        self.pending.push(notification);

        let mut queued = self.pending.take_all();
        while let Some(change) = queued.pop_front() {
            if let Err(e) = self.process_pending(change.clone()).await {
                self.pending.restore(change, queued);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn process_pending(&mut self, change: PendingChainChange) -> Result<()> {
        let state = {
            let mut ctx = self.database.context().await?;
            feasibility(ctx.conn(), &change.notification).await?
        };

        match state {
            Feasibility::Ready => {
                let ChainChangedNotification { removed_chain_block_hashes, added_chain_blocks } = change.notification;
                self.apply_chain_change(&removed_chain_block_hashes, &added_chain_blocks).await
            }
            Feasibility::Deferred => {
                debug!("Deferring chain change ({}), retry {}", change.describe(), change.retries + 1);
                self.pending.defer(change)
            }
            Feasibility::Applied => {
                debug!("Dropping chain change already reflected in store ({})", change.describe());
                Ok(())
            }
        }
    }

    async fn apply_chain_change(&self, removed: &[String], added: &[ChainBlock]) -> Result<()> {
        let mut ctx = self.database.begin().await?;
        let (ingested, update) = self.chain.update(ctx.conn(), removed, added).await?;
        ctx.commit().await?;

        self.dispatcher.blocks_added(&ingested).await?;
        self.dispatcher.chain_changed(&update).await
    }
}

fn stream_closed(stream: &str) -> SyncError {
    SyncError::Rpc(RpcError::Network(format!("{} notification stream closed", stream)))
}

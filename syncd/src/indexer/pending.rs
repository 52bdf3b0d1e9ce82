//! Chain changes waiting for the blocks they reference

use std::collections::{HashMap, HashSet, VecDeque};

use database::stores::BlockStore;
use database::SqliteConnection;
use rpc_core::ChainChangedNotification;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingChainChange {
    pub notification: ChainChangedNotification,
    /// Number of times this change was found infeasible
    pub retries: u32,
}

impl PendingChainChange {
    pub fn new(notification: ChainChangedNotification) -> Self {
        Self { notification, retries: 0 }
    }

    pub fn describe(&self) -> String {
        let added: Vec<&str> = self
            .notification
            .added_chain_blocks
            .iter()
            .map(|block| block.hash.as_str())
            .collect();
        format!(
            "removed {:?}, added {:?}",
            self.notification.removed_chain_block_hashes, added
        )
    }
}

/// Whether a chain change can be applied against the current store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feasibility {
    /// Every referenced block is stored with the chain flag the change expects
    Ready,
    /// Some referenced block is missing or has an unexpected chain flag
    Deferred,
    /// The store already reflects the change
    Applied,
}

/// Checks a chain change against the stored blocks.
///
/// Removed blocks must be chain blocks and added blocks must not be. A block
/// that is both removed and added only has to be stored.
pub async fn feasibility(conn: &mut SqliteConnection, notification: &ChainChangedNotification) -> Result<Feasibility> {
    let removed: HashSet<&str> = notification
        .removed_chain_block_hashes
        .iter()
        .map(String::as_str)
        .collect();
    let added: HashSet<&str> = notification
        .added_chain_blocks
        .iter()
        .map(|block| block.hash.as_str())
        .collect();

    let referenced: Vec<String> = removed.union(&added).map(|hash| hash.to_string()).collect();
    let stored: HashMap<String, bool> = BlockStore::get_by_hashes(conn, &referenced)
        .await?
        .into_iter()
        .map(|block| (block.block_hash, block.is_chain_block))
        .collect();
    if stored.len() != referenced.len() {
        return Ok(Feasibility::Deferred);
    }

    let on_chain = |hash: &str| stored.get(hash) == Some(&true);
    let off_chain = |hash: &str| stored.get(hash) == Some(&false);

    let ready = removed.iter().all(|hash| on_chain(hash))
        && added.iter().filter(|hash| !removed.contains(*hash)).all(|hash| off_chain(hash));
    if ready {
        return Ok(Feasibility::Ready);
    }

    let applied = removed.iter().filter(|hash| !added.contains(*hash)).all(|hash| off_chain(hash))
        && added.iter().all(|hash| on_chain(hash));
    Ok(if applied { Feasibility::Applied } else { Feasibility::Deferred })
}

/// Arrival-ordered queue of chain changes not yet applied.
#[derive(Debug)]
pub struct PendingChainChanges {
    queue: VecDeque<PendingChainChange>,
    max_retries: u32,
}

impl PendingChainChanges {
    pub fn new(max_retries: u32) -> Self {
        Self { queue: VecDeque::new(), max_retries }
    }

    pub fn push(&mut self, notification: ChainChangedNotification) {
        self.queue.push_back(PendingChainChange::new(notification));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes every queued change, oldest first.
    pub fn take_all(&mut self) -> VecDeque<PendingChainChange> {
        std::mem::take(&mut self.queue)
    }

    /// Requeues an infeasible change behind those already requeued.
    pub fn defer(&mut self, mut change: PendingChainChange) -> Result<()> {
        change.retries += 1;
        if change.retries > self.max_retries {
            return Err(SyncError::PendingChainStalled {
                retries: change.retries - 1,
                description: change.describe(),
            });
        }
        self.queue.push_back(change);
        Ok(())
    }

    /// Puts back the change that failed and those taken after it. Changes
    /// deferred earlier in the same pass arrived first and stay ahead.
    pub fn restore(&mut self, failed: PendingChainChange, unexamined: VecDeque<PendingChainChange>) {
        self.queue.push_back(failed);
        self.queue.extend(unexamined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::Database;
    use rpc_core::ChainBlock;
    use tempfile::TempDir;

    fn notification(removed: &[&str], added: &[&str]) -> ChainChangedNotification {
        ChainChangedNotification {
            removed_chain_block_hashes: removed.iter().map(|hash| hash.to_string()).collect(),
            added_chain_blocks: added
                .iter()
                .map(|hash| ChainBlock { hash: hash.to_string(), accepted_blocks: Vec::new() })
                .collect(),
        }
    }

    async fn store(blocks: &[(&str, bool)]) -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("ledger.db")).await.unwrap();
        db.migrate().await.unwrap();
        for (hash, is_chain_block) in blocks {
            sqlx::query(
                "INSERT INTO blocks (block_hash, version, hash_merkle_root, accepted_id_merkle_root, utxo_commitment, \
                 timestamp, bits, nonce, blue_score, is_chain_block, mass) VALUES (?, 1, '', '', '', 0, 0, 0, 0, ?, 0)",
            )
            .bind(*hash)
            .bind(*is_chain_block)
            .execute(db.pool())
            .await
            .unwrap();
        }
        (dir, db)
    }

    fn hashes(pending: &mut PendingChainChanges) -> Vec<String> {
        pending
            .take_all()
            .into_iter()
            .map(|change| change.notification.added_chain_blocks[0].hash.clone())
            .collect()
    }

    #[test]
    fn test_defer_keeps_arrival_order() {
        let mut pending = PendingChainChanges::new(3);
        pending.push(notification(&[], &["a"]));
        pending.push(notification(&[], &["b"]));

        let mut taken = pending.take_all();
        assert!(pending.is_empty());
        while let Some(change) = taken.pop_front() {
            pending.defer(change).unwrap();
        }

        assert_eq!(hashes(&mut pending), vec!["a", "b"]);
    }

    #[test]
    fn test_restore_after_failure_keeps_arrival_order() {
        let mut pending = PendingChainChanges::new(3);
        for hash in ["a", "b", "c"] {
            pending.push(notification(&[], &[hash]));
        }

        let mut taken = pending.take_all();
        pending.defer(taken.pop_front().unwrap()).unwrap();
        let failed = taken.pop_front().unwrap();
        pending.restore(failed, taken);

        assert_eq!(pending.len(), 3);
        assert_eq!(pending.queue[0].retries, 1);
        assert_eq!(pending.queue[1].retries, 0);
        assert_eq!(hashes(&mut pending), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_defer_past_limit_stalls() {
        let mut pending = PendingChainChanges::new(2);
        pending.push(notification(&["x"], &["y"]));
        for _ in 0..2 {
            let change = pending.take_all().pop_front().unwrap();
            pending.defer(change).unwrap();
        }
        let change = pending.take_all().pop_front().unwrap();
        assert_eq!(change.retries, 2);

        match pending.defer(change).unwrap_err() {
            SyncError::PendingChainStalled { retries, description } => {
                assert_eq!(retries, 2);
                assert!(description.contains("\"y\""));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_feasibility_states() {
        let (_dir, db) = store(&[("a", true), ("b", true), ("c", false)]).await;
        let mut ctx = db.context().await.unwrap();
        let conn = ctx.conn();

        assert_eq!(feasibility(conn, &notification(&["b"], &["c"])).await.unwrap(), Feasibility::Ready);
        assert_eq!(feasibility(conn, &notification(&["b"], &["d"])).await.unwrap(), Feasibility::Deferred);
        assert_eq!(feasibility(conn, &notification(&["c"], &["b"])).await.unwrap(), Feasibility::Applied);
        assert_eq!(feasibility(conn, &notification(&[], &["a", "c"])).await.unwrap(), Feasibility::Deferred);
        assert_eq!(feasibility(conn, &notification(&["b"], &["b"])).await.unwrap(), Feasibility::Ready);
        assert_eq!(feasibility(conn, &notification(&["d"], &[])).await.unwrap(), Feasibility::Deferred);
    }
}

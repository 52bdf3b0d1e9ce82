//! Missing ancestor resolution

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use database::stores::BlockStore;
use database::SqliteConnection;
use rpc_core::RpcApi;
use tracing::debug;

use super::{fetch_block, BlockData};
use crate::error::{Result, SyncError};

pub struct AncestorResolver {
    rpc: Arc<dyn RpcApi>,
}

impl AncestorResolver {
    pub fn new(rpc: Arc<dyn RpcApi>) -> Self {
        Self { rpc }
    }

    /// Returns every ancestor of `block` that is neither stored nor in
    /// `staged`, ordered so each block comes after all of its parents.
    ///
    /// Each missing hash is fetched from the peer at most once.
    pub async fn missing_ancestors(
        &self,
        conn: &mut SqliteConnection,
        block: &BlockData,
        staged: &HashSet<String>,
    ) -> Result<Vec<BlockData>> {
        let mut fetched: HashMap<String, BlockData> = HashMap::new();
        let mut stored: HashSet<String> = HashSet::new();
        let mut emitted: HashSet<String> = HashSet::new();
        let mut expanded: HashSet<String> = HashSet::new();
        let mut missing = Vec::new();

        let mut pending: VecDeque<String> = VecDeque::from([block.hash().to_string()]);
        while let Some(hash) = pending.pop_front() {
            if emitted.contains(&hash) {
                continue;
            }

            let parent_hashes = if hash == block.hash() {
                block.parent_hashes().to_vec()
            } else {
                fetched
                    .get(&hash)
                    .map(|ancestor| ancestor.parent_hashes().to_vec())
                    .ok_or_else(|| SyncError::InvalidData(format!("ancestor {} was never fetched", hash)))?
            };

            let candidates: Vec<String> = parent_hashes
                .iter()
                .filter(|parent| !staged.contains(*parent) && !emitted.contains(*parent) && !stored.contains(*parent))
                .cloned()
                .collect();
            if !candidates.is_empty() {
                stored.extend(BlockStore::existing_hashes(conn, &candidates).await?);
            }
            let unresolved: Vec<String> = candidates.into_iter().filter(|parent| !stored.contains(parent)).collect();

            if unresolved.is_empty() {
                if hash != block.hash() {
                    if let Some(ancestor) = fetched.remove(&hash) {
                        emitted.insert(hash);
                        missing.push(ancestor);
                    }
                }
                continue;
            }

            if !expanded.insert(hash.clone()) {
                return Err(SyncError::InvalidData(format!(
                    "ancestry of block {} does not resolve (parents {:?})",
                    hash, unresolved
                )));
            }

            pending.push_front(hash);
            for parent in unresolved.into_iter().rev() {
                if !fetched.contains_key(&parent) {
                    debug!("Fetching missing ancestor {}", parent);
                    let ancestor = fetch_block(self.rpc.as_ref(), &parent).await?;
                    fetched.insert(parent.clone(), ancestor);
                }
                pending.push_front(parent);
            }
        }

        if !missing.is_empty() {
            debug!("Resolved {} missing ancestors of block {}", missing.len(), block.hash());
        }
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use database::Database;
    use rpc_core::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves a fixed set of blocks and records each fetch.
    struct StaticPeer {
        blocks: HashMap<String, Vec<String>>,
        fetches: Mutex<Vec<String>>,
    }

    fn verbose(hash: &str, parents: &[String]) -> BlockVerboseData {
        BlockVerboseData {
            hash: hash.to_string(),
            version: 1,
            hash_merkle_root: String::new(),
            accepted_id_merkle_root: String::new(),
            utxo_commitment: String::new(),
            time: 0,
            nonce: 0,
            bits: "207fffff".to_string(),
            parent_hashes: parents.to_vec(),
            accepted_block_hashes: Vec::new(),
            blue_score: 0,
            mass: 0,
            raw_txs: Vec::new(),
        }
    }

    #[async_trait]
    impl RpcApi for StaticPeer {
        async fn get_blocks(&self, _: Option<&str>, _: bool, _: bool) -> std::result::Result<GetBlocksResponse, RpcError> {
            Ok(GetBlocksResponse::default())
        }

        async fn get_block(&self, hash: &str, _: bool, _: bool) -> std::result::Result<GetBlockResponse, RpcError> {
            self.fetches.lock().unwrap().push(hash.to_string());
            let parents = self
                .blocks
                .get(hash)
                .ok_or_else(|| RpcError::Rpc { code: -5, message: format!("block {} not found", hash) })?;
            Ok(GetBlockResponse {
                block_hex: Some("00".to_string()),
                block_verbose_data: Some(verbose(hash, parents)),
            })
        }

        async fn get_chain_from_block(
            &self,
            _: Option<&str>,
            _: bool,
        ) -> std::result::Result<GetChainFromBlockResponse, RpcError> {
            Ok(GetChainFromBlockResponse::default())
        }

        async fn get_subnetwork(&self, _: &str) -> std::result::Result<SubnetworkResponse, RpcError> {
            Ok(SubnetworkResponse::default())
        }
    }

    fn peer(edges: &[(&str, &[&str])]) -> Arc<StaticPeer> {
        Arc::new(StaticPeer {
            blocks: edges
                .iter()
                .map(|(hash, parents)| (hash.to_string(), parents.iter().map(|p| p.to_string()).collect()))
                .collect(),
            fetches: Mutex::new(Vec::new()),
        })
    }

    fn block(hash: &str, parents: &[&str]) -> BlockData {
        let parents: Vec<String> = parents.iter().map(|p| p.to_string()).collect();
        BlockData { raw: vec![0], verbose: verbose(hash, &parents) }
    }

    async fn store_with_genesis() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("ledger.db")).await.unwrap();
        db.migrate().await.unwrap();
        sqlx::query(
            "INSERT INTO blocks (block_hash, version, hash_merkle_root, accepted_id_merkle_root, utxo_commitment, \
             timestamp, bits, nonce, blue_score, is_chain_block, mass) VALUES ('g', 1, '', '', '', 0, 0, 0, 0, TRUE, 0)",
        )
        .execute(db.pool())
        .await
        .unwrap();
        (dir, db)
    }

    fn hashes(blocks: &[BlockData]) -> Vec<&str> {
        blocks.iter().map(BlockData::hash).collect()
    }

    #[tokio::test]
    async fn test_diamond_fetched_once_in_parent_order() {
        let (_dir, db) = store_with_genesis().await;
        // g <- a <- {b, c} <- d
        let peer = peer(&[("a", &["g"]), ("b", &["a"]), ("c", &["a"])]);
        let resolver = AncestorResolver::new(peer.clone());
        let mut ctx = db.context().await.unwrap();

        let missing = resolver
            .missing_ancestors(ctx.conn(), &block("d", &["b", "c"]), &HashSet::new())
            .await
            .unwrap();

        assert_eq!(hashes(&missing), vec!["a", "b", "c"]);
        let mut fetches = peer.fetches.lock().unwrap().clone();
        fetches.sort();
        assert_eq!(fetches, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_staged_parents_are_resolved() {
        let (_dir, db) = store_with_genesis().await;
        let peer = peer(&[]);
        let resolver = AncestorResolver::new(peer.clone());
        let mut ctx = db.context().await.unwrap();

        let staged: HashSet<String> = ["x".to_string()].into();
        let missing = resolver
            .missing_ancestors(ctx.conn(), &block("y", &["x", "g"]), &staged)
            .await
            .unwrap();
        assert!(missing.is_empty());
        assert!(peer.fetches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_is_invalid_data() {
        let (_dir, db) = store_with_genesis().await;
        let peer = peer(&[("p", &["q"]), ("q", &["p"])]);
        let resolver = AncestorResolver::new(peer);
        let mut ctx = db.context().await.unwrap();

        let err = resolver
            .missing_ancestors(ctx.conn(), &block("child", &["p"]), &HashSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_peer_error_aborts() {
        let (_dir, db) = store_with_genesis().await;
        let resolver = AncestorResolver::new(peer(&[]));
        let mut ctx = db.context().await.unwrap();

        let err = resolver
            .missing_ancestors(ctx.conn(), &block("child", &["unknown"]), &HashSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Rpc(_)));
    }
}

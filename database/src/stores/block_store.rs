use std::collections::{HashMap, HashSet};

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::{chunk_size, push_in_list, INSERT_CHUNK_SIZE};
use crate::errors::{DbResult, QueryContext};
use crate::models::{to_db_u64, AcceptedBlock, Block, NewBlock, ParentBlock, RawBlock};

const BLOCK_COLUMNS: &str = "id, block_hash, version, hash_merkle_root, accepted_id_merkle_root, \
     utxo_commitment, timestamp, bits, nonce, blue_score, is_chain_block, accepting_block_id, mass";

pub struct BlockStore;

impl BlockStore {
    pub async fn get_by_hash(conn: &mut SqliteConnection, hash: &str) -> DbResult<Option<Block>> {
        let query = format!("SELECT {} FROM blocks WHERE block_hash = ?", BLOCK_COLUMNS);
        sqlx::query_as::<_, Block>(&query)
            .bind(hash)
            .fetch_optional(conn)
            .await
            .context("load block by hash")
    }

    pub async fn get_by_hashes(conn: &mut SqliteConnection, hashes: &[String]) -> DbResult<Vec<Block>> {
        let mut blocks = Vec::with_capacity(hashes.len());
        for chunk in hashes.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {} FROM blocks WHERE block_hash IN ",
                BLOCK_COLUMNS
            ));
            push_in_list(&mut builder, chunk.iter().map(String::as_str));
            let rows = builder
                .build_query_as::<Block>()
                .fetch_all(&mut *conn)
                .await
                .context("load blocks by hashes")?;
            blocks.extend(rows);
        }
        Ok(blocks)
    }

    /// Maps each stored hash among `hashes` to its row ID.
    pub async fn ids_by_hashes(conn: &mut SqliteConnection, hashes: &[String]) -> DbResult<HashMap<String, i64>> {
        let mut ids = HashMap::with_capacity(hashes.len());
        for chunk in hashes.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new("SELECT block_hash, id FROM blocks WHERE block_hash IN ");
            push_in_list(&mut builder, chunk.iter().map(String::as_str));
            let rows = builder
                .build_query_as::<(String, i64)>()
                .fetch_all(&mut *conn)
                .await
                .context("load block ids")?;
            ids.extend(rows);
        }
        Ok(ids)
    }

    pub async fn existing_hashes(conn: &mut SqliteConnection, hashes: &[String]) -> DbResult<HashSet<String>> {
        Ok(Self::ids_by_hashes(conn, hashes).await?.into_keys().collect())
    }

    pub async fn exists(conn: &mut SqliteConnection, hash: &str) -> DbResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM blocks WHERE block_hash = ?")
            .bind(hash)
            .fetch_optional(conn)
            .await
            .context("check block existence")?;
        Ok(found.is_some())
    }

    /// Stored block with the highest blue score.
    pub async fn bluest(conn: &mut SqliteConnection) -> DbResult<Option<Block>> {
        let query = format!("SELECT {} FROM blocks ORDER BY blue_score DESC, id DESC LIMIT 1", BLOCK_COLUMNS);
        sqlx::query_as::<_, Block>(&query)
            .fetch_optional(conn)
            .await
            .context("load bluest block")
    }

    /// Chain block with the highest blue score.
    pub async fn selected_tip(conn: &mut SqliteConnection) -> DbResult<Option<Block>> {
        let query = format!(
            "SELECT {} FROM blocks WHERE is_chain_block = TRUE ORDER BY blue_score DESC, id DESC LIMIT 1",
            BLOCK_COLUMNS
        );
        sqlx::query_as::<_, Block>(&query)
            .fetch_optional(conn)
            .await
            .context("load selected tip")
    }

    pub async fn count(conn: &mut SqliteConnection) -> DbResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
            .fetch_one(conn)
            .await
            .context("count blocks")
    }

    pub async fn insert(conn: &mut SqliteConnection, blocks: &[NewBlock]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in blocks.chunks(chunk_size(11)) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO blocks (block_hash, version, hash_merkle_root, accepted_id_merkle_root, \
                 utxo_commitment, timestamp, bits, nonce, blue_score, is_chain_block, mass) ",
            );
            builder.push_values(chunk, |mut row, block| {
                row.push_bind(block.block_hash.as_str())
                    .push_bind(block.version)
                    .push_bind(block.hash_merkle_root.as_str())
                    .push_bind(block.accepted_id_merkle_root.as_str())
                    .push_bind(block.utxo_commitment.as_str())
                    .push_bind(block.timestamp)
                    .push_bind(i64::from(block.bits))
                    .push_bind(to_db_u64(block.nonce))
                    .push_bind(to_db_u64(block.blue_score))
                    .push_bind(block.is_chain_block)
                    .push_bind(to_db_u64(block.mass));
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert blocks")?
                .rows_affected();
        }
        Ok(inserted)
    }

    pub async fn insert_parents(conn: &mut SqliteConnection, edges: &[ParentBlock]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in edges.chunks(chunk_size(2)) {
            let mut builder = QueryBuilder::<Sqlite>::new("INSERT INTO parent_blocks (block_id, parent_block_id) ");
            builder.push_values(chunk, |mut row, edge| {
                row.push_bind(edge.block_id).push_bind(edge.parent_block_id);
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert parent blocks")?
                .rows_affected();
        }
        Ok(inserted)
    }

    pub async fn insert_accepted(conn: &mut SqliteConnection, edges: &[AcceptedBlock]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in edges.chunks(chunk_size(2)) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("INSERT INTO accepted_blocks (block_id, accepted_block_id) ");
            builder.push_values(chunk, |mut row, edge| {
                row.push_bind(edge.block_id).push_bind(edge.accepted_block_id);
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert accepted blocks")?
                .rows_affected();
        }
        Ok(inserted)
    }

    pub async fn insert_raw(conn: &mut SqliteConnection, raw_blocks: &[RawBlock]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in raw_blocks.chunks(chunk_size(2)) {
            let mut builder = QueryBuilder::<Sqlite>::new("INSERT INTO raw_blocks (block_id, block_data) ");
            builder.push_values(chunk, |mut row, raw| {
                row.push_bind(raw.block_id).push_bind(raw.block_data.as_slice());
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert raw blocks")?
                .rows_affected();
        }
        Ok(inserted)
    }

    pub async fn set_is_chain_block(conn: &mut SqliteConnection, block_id: i64, is_chain_block: bool) -> DbResult<()> {
        sqlx::query("UPDATE blocks SET is_chain_block = ? WHERE id = ?")
            .bind(is_chain_block)
            .bind(block_id)
            .execute(conn)
            .await
            .context("update chain block flag")?;
        Ok(())
    }

    pub async fn set_accepting_block(
        conn: &mut SqliteConnection,
        block_ids: &[i64],
        accepting_block_id: Option<i64>,
    ) -> DbResult<u64> {
        let mut updated = 0;
        for chunk in block_ids.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE blocks SET accepting_block_id = ");
            builder.push_bind(accepting_block_id).push(" WHERE id IN ");
            push_in_list(&mut builder, chunk.iter().copied());
            updated += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("update block accepting block")?
                .rows_affected();
        }
        Ok(updated)
    }

    /// Clears the accepting block of every block accepted by `accepting_block_id`.
    pub async fn clear_accepted_by(conn: &mut SqliteConnection, accepting_block_id: i64) -> DbResult<u64> {
        let result = sqlx::query("UPDATE blocks SET accepting_block_id = NULL WHERE accepting_block_id = ?")
            .bind(accepting_block_id)
            .execute(conn)
            .await
            .context("clear accepted blocks")?;
        Ok(result.rows_affected())
    }

    pub async fn parent_hashes(conn: &mut SqliteConnection, block_id: i64) -> DbResult<Vec<String>> {
        sqlx::query_scalar(
            "SELECT b.block_hash FROM parent_blocks p JOIN blocks b ON b.id = p.parent_block_id \
             WHERE p.block_id = ? ORDER BY b.block_hash",
        )
        .bind(block_id)
        .fetch_all(conn)
        .await
        .context("load parent hashes")
    }

    /// Hashes of the blocks currently accepted by `accepting_block_id`.
    pub async fn accepted_hashes(conn: &mut SqliteConnection, accepting_block_id: i64) -> DbResult<Vec<String>> {
        sqlx::query_scalar("SELECT block_hash FROM blocks WHERE accepting_block_id = ? ORDER BY id")
            .bind(accepting_block_id)
            .fetch_all(conn)
            .await
            .context("load accepted block hashes")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::stores::test_support::migrated_database;

    pub fn new_block(hash: &str, blue_score: u64, is_chain_block: bool) -> NewBlock {
        NewBlock {
            block_hash: hash.to_string(),
            version: 1,
            hash_merkle_root: "merkle".to_string(),
            accepted_id_merkle_root: "accepted".to_string(),
            utxo_commitment: "utxo".to_string(),
            timestamp: 1_600_000_000,
            bits: 0x207fffff,
            nonce: u64::MAX,
            blue_score,
            is_chain_block,
            mass: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let (_dir, db) = migrated_database().await;
        let mut ctx = db.context().await.unwrap();
        let conn = ctx.conn();

        let inserted = BlockStore::insert(conn, &[new_block("a", 0, true), new_block("b", 1, false)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let a = BlockStore::get_by_hash(conn, "a").await.unwrap().unwrap();
        assert!(a.is_chain_block);
        assert_eq!(crate::models::from_db_u64(a.nonce), u64::MAX);
        assert!(BlockStore::get_by_hash(conn, "missing").await.unwrap().is_none());

        let existing = BlockStore::existing_hashes(conn, &["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(existing.len(), 2);
        assert!(!existing.contains("c"));

        assert_eq!(BlockStore::bluest(conn).await.unwrap().unwrap().block_hash, "b");
        assert_eq!(BlockStore::selected_tip(conn).await.unwrap().unwrap().block_hash, "a");
    }

    #[tokio::test]
    async fn test_edges_and_acceptance() {
        let (_dir, db) = migrated_database().await;
        let mut ctx = db.begin().await.unwrap();
        let conn = ctx.conn();

        BlockStore::insert(conn, &[new_block("a", 0, true), new_block("b", 1, false), new_block("c", 2, false)])
            .await
            .unwrap();
        let ids = BlockStore::ids_by_hashes(conn, &["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        let (a, b, c) = (ids["a"], ids["b"], ids["c"]);

        BlockStore::insert_parents(
            conn,
            &[
                ParentBlock { block_id: c, parent_block_id: a },
                ParentBlock { block_id: c, parent_block_id: b },
            ],
        )
        .await
        .unwrap();
        assert_eq!(BlockStore::parent_hashes(conn, c).await.unwrap(), vec!["a", "b"]);

        BlockStore::set_accepting_block(conn, &[a, b], Some(c)).await.unwrap();
        assert_eq!(BlockStore::accepted_hashes(conn, c).await.unwrap(), vec!["a", "b"]);

        assert_eq!(BlockStore::clear_accepted_by(conn, c).await.unwrap(), 2);
        assert!(BlockStore::accepted_hashes(conn, c).await.unwrap().is_empty());

        BlockStore::set_is_chain_block(conn, c, true).await.unwrap();
        assert_eq!(BlockStore::selected_tip(conn).await.unwrap().unwrap().block_hash, "c");
        ctx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_hash_rejected() {
        let (_dir, db) = migrated_database().await;
        let mut ctx = db.context().await.unwrap();
        BlockStore::insert(ctx.conn(), &[new_block("a", 0, true)]).await.unwrap();
        assert!(BlockStore::insert(ctx.conn(), &[new_block("a", 0, true)]).await.is_err());
    }
}

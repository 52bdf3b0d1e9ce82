//! Read queries behind the public query surface

use std::collections::HashMap;

use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};

use crate::errors::{DbError, DbResult, QueryContext};
use crate::models::*;
use crate::stores::{push_in_list, BlockStore, TransactionStore, INSERT_CHUNK_SIZE};

pub struct BlockQueries;

impl BlockQueries {
    pub async fn get_by_hash(conn: &mut SqliteConnection, hash: &str) -> DbResult<Option<BlockSummary>> {
        match BlockStore::get_by_hash(conn, hash).await? {
            Some(block) => Ok(Some(Self::summarize(conn, block).await?)),
            None => Ok(None),
        }
    }

    /// Blocks ordered by blue score, newest first.
    pub async fn list_by_blue_score(
        conn: &mut SqliteConnection,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<BlockSummary>> {
        let hashes: Vec<String> =
            sqlx::query_scalar("SELECT block_hash FROM blocks ORDER BY blue_score DESC, id DESC LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch_all(&mut *conn)
                .await
                .context("list blocks")?;

        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(block) = Self::get_by_hash(conn, &hash).await? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    pub async fn selected_tip(conn: &mut SqliteConnection) -> DbResult<Option<BlockSummary>> {
        match BlockStore::selected_tip(conn).await? {
            Some(block) => Ok(Some(Self::summarize(conn, block).await?)),
            None => Ok(None),
        }
    }

    pub async fn count(conn: &mut SqliteConnection) -> DbResult<i64> {
        BlockStore::count(conn).await
    }

    async fn summarize(conn: &mut SqliteConnection, block: Block) -> DbResult<BlockSummary> {
        let parent_block_hashes = BlockStore::parent_hashes(conn, block.id).await?;
        let accepting_block_hash = match block.accepting_block_id {
            Some(id) => Some(
                sqlx::query_scalar::<_, String>("SELECT block_hash FROM blocks WHERE id = ?")
                    .bind(id)
                    .fetch_one(&mut *conn)
                    .await
                    .context("load accepting block hash")?,
            ),
            None => None,
        };
        let bits = u32::try_from(block.bits)
            .map_err(|_| DbError::InvalidData(format!("block {} has bits {}", block.block_hash, block.bits)))?;

        Ok(BlockSummary {
            block_hash: block.block_hash,
            version: block.version,
            hash_merkle_root: block.hash_merkle_root,
            accepted_id_merkle_root: block.accepted_id_merkle_root,
            utxo_commitment: block.utxo_commitment,
            timestamp: block.timestamp,
            bits,
            nonce: from_db_u64(block.nonce),
            parent_block_hashes,
            blue_score: from_db_u64(block.blue_score),
            is_chain_block: block.is_chain_block,
            accepting_block_hash,
            mass: from_db_u64(block.mass),
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: i64,
    transaction_id: String,
    transaction_hash: String,
    accepting_block_hash: Option<String>,
    accepting_block_blue_score: Option<i64>,
    subnetwork_id: String,
    lock_time: i64,
    gas: i64,
    payload_hash: String,
    payload: Vec<u8>,
    mass: i64,
    version: i32,
}

#[derive(FromRow)]
struct InputRow {
    transaction_id: i64,
    previous_transaction_id: String,
    previous_index: i64,
    signature_script: Vec<u8>,
    sequence: i64,
    address: Option<String>,
    value: i64,
}

#[derive(FromRow)]
struct OutputRow {
    transaction_id: i64,
    idx: i64,
    value: i64,
    script_pub_key: Vec<u8>,
    address: Option<String>,
    is_spent: bool,
}

fn to_index(value: i64) -> DbResult<u32> {
    u32::try_from(value).map_err(|_| DbError::InvalidData(format!("invalid output index {}", value)))
}

pub struct TransactionQueries;

impl TransactionQueries {
    pub async fn get_by_id(conn: &mut SqliteConnection, transaction_id: &str) -> DbResult<Option<TransactionSummary>> {
        let Some(transaction) = TransactionStore::get_by_transaction_id(conn, transaction_id).await? else {
            return Ok(None);
        };
        Ok(Self::get_by_row_ids(conn, &[transaction.id]).await?.pop())
    }

    pub async fn get_by_hash(conn: &mut SqliteConnection, transaction_hash: &str) -> DbResult<Vec<TransactionSummary>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM transactions WHERE transaction_hash = ? ORDER BY id")
            .bind(transaction_hash)
            .fetch_all(&mut *conn)
            .await
            .context("look up transactions by hash")?;
        Self::get_by_row_ids(conn, &ids).await
    }

    /// Full projections for the given row IDs, in the order requested.
    pub async fn get_by_row_ids(conn: &mut SqliteConnection, ids: &[i64]) -> DbResult<Vec<TransactionSummary>> {
        let mut summaries: HashMap<i64, TransactionSummary> = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT t.id, t.transaction_id, t.transaction_hash, ab.block_hash AS accepting_block_hash, \
                 ab.blue_score AS accepting_block_blue_score, s.subnetwork_id, t.lock_time, t.gas, \
                 t.payload_hash, t.payload, t.mass, t.version \
                 FROM transactions t \
                 JOIN subnetworks s ON s.id = t.subnetwork_id \
                 LEFT JOIN blocks ab ON ab.id = t.accepting_block_id \
                 WHERE t.id IN ",
            );
            push_in_list(&mut builder, chunk.iter().copied());
            let rows = builder
                .build_query_as::<TransactionRow>()
                .fetch_all(&mut *conn)
                .await
                .context("load transactions")?;
            for row in rows {
                summaries.insert(
                    row.id,
                    TransactionSummary {
                        transaction_id: row.transaction_id,
                        transaction_hash: row.transaction_hash,
                        accepting_block_hash: row.accepting_block_hash,
                        accepting_block_blue_score: row.accepting_block_blue_score.map(from_db_u64),
                        subnetwork_id: row.subnetwork_id,
                        lock_time: from_db_u64(row.lock_time),
                        gas: from_db_u64(row.gas),
                        payload_hash: row.payload_hash,
                        payload: hex::encode(row.payload),
                        mass: from_db_u64(row.mass),
                        version: row.version,
                        inputs: Vec::new(),
                        outputs: Vec::new(),
                    },
                );
            }

            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT i.transaction_id, pt.transaction_id AS previous_transaction_id, o.idx AS previous_index, \
                 i.signature_script, i.sequence, a.address, o.value \
                 FROM transaction_inputs i \
                 JOIN transaction_outputs o ON o.id = i.previous_transaction_output_id \
                 JOIN transactions pt ON pt.id = o.transaction_id \
                 LEFT JOIN addresses a ON a.id = o.address_id \
                 WHERE i.transaction_id IN ",
            );
            push_in_list(&mut builder, chunk.iter().copied());
            builder.push(" ORDER BY i.transaction_id, i.idx");
            let inputs = builder
                .build_query_as::<InputRow>()
                .fetch_all(&mut *conn)
                .await
                .context("load transaction inputs")?;
            for input in inputs {
                if let Some(summary) = summaries.get_mut(&input.transaction_id) {
                    summary.inputs.push(InputSummary {
                        previous_transaction_id: input.previous_transaction_id,
                        previous_transaction_output_index: to_index(input.previous_index)?,
                        signature_script: hex::encode(input.signature_script),
                        sequence: from_db_u64(input.sequence),
                        address: input.address,
                        value: from_db_u64(input.value),
                    });
                }
            }

            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT o.transaction_id, o.idx, o.value, o.script_pub_key, a.address, o.is_spent \
                 FROM transaction_outputs o \
                 LEFT JOIN addresses a ON a.id = o.address_id \
                 WHERE o.transaction_id IN ",
            );
            push_in_list(&mut builder, chunk.iter().copied());
            builder.push(" ORDER BY o.transaction_id, o.idx");
            let outputs = builder
                .build_query_as::<OutputRow>()
                .fetch_all(&mut *conn)
                .await
                .context("load transaction outputs")?;
            for output in outputs {
                if let Some(summary) = summaries.get_mut(&output.transaction_id) {
                    summary.outputs.push(OutputSummary {
                        index: to_index(output.idx)?,
                        value: from_db_u64(output.value),
                        script_pub_key: hex::encode(output.script_pub_key),
                        address: output.address,
                        is_spent: output.is_spent,
                    });
                }
            }
        }

        Ok(ids.iter().filter_map(|id| summaries.remove(id)).collect())
    }
}

pub struct AddressQueries;

impl AddressQueries {
    /// Transactions paying to or spending from `address`, newest first.
    pub async fn transactions(
        conn: &mut SqliteConnection,
        address: &str,
        limit: i64,
        offset: i64,
    ) -> DbResult<Vec<TransactionSummary>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT t.id
            FROM transactions t
            WHERE t.id IN (
                SELECT o.transaction_id
                FROM transaction_outputs o
                JOIN addresses a ON a.id = o.address_id
                WHERE a.address = ?
            )
            OR t.id IN (
                SELECT i.transaction_id
                FROM transaction_inputs i
                JOIN transaction_outputs o ON o.id = i.previous_transaction_output_id
                JOIN addresses a ON a.id = o.address_id
                WHERE a.address = ?
            )
            ORDER BY t.id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(address)
        .bind(address)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await
        .context("list address transactions")?;

        TransactionQueries::get_by_row_ids(conn, &ids).await
    }

    /// Unspent outputs paying to `address`.
    pub async fn utxos(conn: &mut SqliteConnection, address: &str) -> DbResult<Vec<UtxoSummary>> {
        let rows: Vec<(String, i64, i64, Vec<u8>, Option<String>, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT t.transaction_id, o.idx, o.value, o.script_pub_key, ab.block_hash, ab.blue_score
            FROM transaction_outputs o
            JOIN addresses a ON a.id = o.address_id
            JOIN transactions t ON t.id = o.transaction_id
            LEFT JOIN blocks ab ON ab.id = t.accepting_block_id
            WHERE a.address = ? AND o.is_spent = FALSE
            ORDER BY o.id
            "#,
        )
        .bind(address)
        .fetch_all(conn)
        .await
        .context("list address utxos")?;

        rows.into_iter()
            .map(|(transaction_id, index, value, script_pub_key, accepting_block_hash, blue_score)| {
                Ok(UtxoSummary {
                    transaction_id,
                    index: to_index(index)?,
                    value: from_db_u64(value),
                    script_pub_key: hex::encode(script_pub_key),
                    accepting_block_hash,
                    accepting_block_blue_score: blue_score.map(from_db_u64),
                })
            })
            .collect()
    }
}

use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::{chunk_size, push_in_list, INSERT_CHUNK_SIZE};
use crate::errors::{DbError, DbResult, QueryContext};
use crate::models::{
    to_db_u64, NewTransaction, Outpoint, RawTransaction, SpentOutput, Transaction, TransactionBlock,
    TransactionWithInputs,
};

const TRANSACTION_COLUMNS: &str = "id, transaction_id, transaction_hash, lock_time, subnetwork_id, gas, \
     payload_hash, payload, mass, version, accepting_block_id";

/// Joins every transaction to the previous output of each of its inputs.
const WITH_INPUTS_SELECT: &str = "SELECT t.id, t.transaction_id, o.id, pt.transaction_id, o.idx, o.is_spent \
     FROM transactions t \
     LEFT JOIN transaction_inputs i ON i.transaction_id = t.id \
     LEFT JOIN transaction_outputs o ON o.id = i.previous_transaction_output_id \
     LEFT JOIN transactions pt ON pt.id = o.transaction_id ";

type WithInputsRow = (i64, String, Option<i64>, Option<String>, Option<i64>, Option<bool>);

pub struct TransactionStore;

impl TransactionStore {
    pub async fn get_by_transaction_id(
        conn: &mut SqliteConnection,
        transaction_id: &str,
    ) -> DbResult<Option<Transaction>> {
        let query = format!("SELECT {} FROM transactions WHERE transaction_id = ?", TRANSACTION_COLUMNS);
        sqlx::query_as::<_, Transaction>(&query)
            .bind(transaction_id)
            .fetch_optional(conn)
            .await
            .context("load transaction")
    }

    /// Maps each stored transaction ID among `transaction_ids` to its row ID.
    pub async fn ids_by_transaction_ids(
        conn: &mut SqliteConnection,
        transaction_ids: &[String],
    ) -> DbResult<HashMap<String, i64>> {
        let mut ids = HashMap::with_capacity(transaction_ids.len());
        for chunk in transaction_ids.chunks(INSERT_CHUNK_SIZE) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("SELECT transaction_id, id FROM transactions WHERE transaction_id IN ");
            push_in_list(&mut builder, chunk.iter().map(String::as_str));
            let rows = builder
                .build_query_as::<(String, i64)>()
                .fetch_all(&mut *conn)
                .await
                .context("load transaction ids")?;
            ids.extend(rows);
        }
        Ok(ids)
    }

    pub async fn insert(conn: &mut SqliteConnection, transactions: &[NewTransaction]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in transactions.chunks(chunk_size(9)) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO transactions (transaction_id, transaction_hash, lock_time, subnetwork_id, gas, \
                 payload_hash, payload, mass, version) ",
            );
            builder.push_values(chunk, |mut row, tx| {
                row.push_bind(tx.transaction_id.as_str())
                    .push_bind(tx.transaction_hash.as_str())
                    .push_bind(to_db_u64(tx.lock_time))
                    .push_bind(tx.subnetwork_id)
                    .push_bind(to_db_u64(tx.gas))
                    .push_bind(tx.payload_hash.as_str())
                    .push_bind(tx.payload.as_slice())
                    .push_bind(to_db_u64(tx.mass))
                    .push_bind(tx.version);
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert transactions")?
                .rows_affected();
        }
        Ok(inserted)
    }

    pub async fn insert_blocks(conn: &mut SqliteConnection, edges: &[TransactionBlock]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in edges.chunks(chunk_size(3)) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("INSERT INTO transactions_to_blocks (transaction_id, block_id, idx) ");
            builder.push_values(chunk, |mut row, edge| {
                row.push_bind(edge.transaction_id)
                    .push_bind(edge.block_id)
                    .push_bind(i64::from(edge.index));
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert transaction block edges")?
                .rows_affected();
        }
        Ok(inserted)
    }

    pub async fn insert_raw(conn: &mut SqliteConnection, raw_transactions: &[RawTransaction]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in raw_transactions.chunks(chunk_size(2)) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("INSERT INTO raw_transactions (transaction_id, transaction_data) ");
            builder.push_values(chunk, |mut row, raw| {
                row.push_bind(raw.transaction_id).push_bind(raw.transaction_data.as_slice());
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert raw transactions")?
                .rows_affected();
        }
        Ok(inserted)
    }

    pub async fn set_accepting_block(
        conn: &mut SqliteConnection,
        ids: &[i64],
        accepting_block_id: Option<i64>,
    ) -> DbResult<u64> {
        let mut updated = 0;
        for chunk in ids.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE transactions SET accepting_block_id = ");
            builder.push_bind(accepting_block_id).push(" WHERE id IN ");
            push_in_list(&mut builder, chunk.iter().copied());
            updated += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("update transaction accepting block")?
                .rows_affected();
        }
        Ok(updated)
    }

    /// Transactions currently accepted by `block_id`, with their previous outputs.
    pub async fn accepted_by_block_id(
        conn: &mut SqliteConnection,
        block_id: i64,
    ) -> DbResult<Vec<TransactionWithInputs>> {
        let query = format!("{} WHERE t.accepting_block_id = ? ORDER BY t.id, i.idx", WITH_INPUTS_SELECT);
        let rows = sqlx::query_as::<_, WithInputsRow>(&query)
            .bind(block_id)
            .fetch_all(conn)
            .await
            .context("load accepted transactions")?;
        group_with_inputs(rows)
    }

    /// Transactions among `transaction_ids` that are contained in `block_id`.
    pub async fn by_ids_and_block_id(
        conn: &mut SqliteConnection,
        transaction_ids: &[String],
        block_id: i64,
    ) -> DbResult<Vec<TransactionWithInputs>> {
        let mut rows = Vec::new();
        for chunk in transaction_ids.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new(WITH_INPUTS_SELECT);
            builder
                .push("JOIN transactions_to_blocks tb ON tb.transaction_id = t.id AND tb.block_id = ")
                .push_bind(block_id)
                .push(" WHERE t.transaction_id IN ");
            push_in_list(&mut builder, chunk.iter().map(String::as_str));
            builder.push(" ORDER BY t.id, i.idx");
            let chunk_rows = builder
                .build_query_as::<WithInputsRow>()
                .fetch_all(&mut *conn)
                .await
                .context("load block transactions by ids")?;
            rows.extend(chunk_rows);
        }
        group_with_inputs(rows)
    }
}

fn group_with_inputs(rows: Vec<WithInputsRow>) -> DbResult<Vec<TransactionWithInputs>> {
    let mut transactions: Vec<TransactionWithInputs> = Vec::new();
    for (id, transaction_id, output_id, previous_transaction_id, index, is_spent) in rows {
        if transactions.last().map(|tx| tx.id) != Some(id) {
            transactions.push(TransactionWithInputs { id, transaction_id, previous_outputs: Vec::new() });
        }
        let Some(output_id) = output_id else { continue };
        let (Some(previous_transaction_id), Some(index), Some(is_spent)) = (previous_transaction_id, index, is_spent)
        else {
            return Err(DbError::InvalidData(format!("output {} has no creating transaction", output_id)));
        };
        let index = u32::try_from(index)
            .map_err(|_| DbError::InvalidData(format!("output {} has index {}", output_id, index)))?;
        if let Some(tx) = transactions.last_mut() {
            tx.previous_outputs.push(SpentOutput {
                output_id,
                outpoint: Outpoint::new(previous_transaction_id, index),
                is_spent,
            });
        }
    }
    Ok(transactions)
}

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::{chunk_size, push_in_list, INSERT_CHUNK_SIZE};
use crate::errors::{DbError, DbResult, QueryContext};
use crate::models::{to_db_u64, NewTransactionOutput, Outpoint, StoredOutput};

pub struct OutputStore;

impl OutputStore {
    pub async fn insert(conn: &mut SqliteConnection, outputs: &[NewTransactionOutput]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in outputs.chunks(chunk_size(5)) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO transaction_outputs (transaction_id, idx, value, script_pub_key, address_id) ",
            );
            builder.push_values(chunk, |mut row, output| {
                row.push_bind(output.transaction_id)
                    .push_bind(i64::from(output.index))
                    .push_bind(to_db_u64(output.value))
                    .push_bind(output.script_pub_key.as_slice())
                    .push_bind(output.address_id);
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert transaction outputs")?
                .rows_affected();
        }
        Ok(inserted)
    }

    /// Resolves outpoints to stored outputs. Outpoints with no stored output
    /// are absent from the result.
    pub async fn by_outpoints(conn: &mut SqliteConnection, outpoints: &[Outpoint]) -> DbResult<Vec<StoredOutput>> {
        let mut outputs = Vec::with_capacity(outpoints.len());
        for chunk in outpoints.chunks(chunk_size(2)) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT o.id, t.transaction_id, o.idx, o.script_pub_key, o.is_spent \
                 FROM transaction_outputs o JOIN transactions t ON t.id = o.transaction_id \
                 WHERE (t.transaction_id, o.idx) IN (VALUES ",
            );
            for (i, outpoint) in chunk.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder
                    .push("(")
                    .push_bind(outpoint.transaction_id.as_str())
                    .push(", ")
                    .push_bind(i64::from(outpoint.index))
                    .push(")");
            }
            builder.push(")");

            let rows = builder
                .build_query_as::<(i64, String, i64, Vec<u8>, bool)>()
                .fetch_all(&mut *conn)
                .await
                .context("resolve outpoints")?;
            for (id, transaction_id, index, script_pub_key, is_spent) in rows {
                let index = u32::try_from(index)
                    .map_err(|_| DbError::InvalidData(format!("output {} has index {}", id, index)))?;
                outputs.push(StoredOutput {
                    id,
                    outpoint: Outpoint::new(transaction_id, index),
                    script_pub_key,
                    is_spent,
                });
            }
        }
        Ok(outputs)
    }

    pub async fn set_spent(conn: &mut SqliteConnection, output_ids: &[i64], is_spent: bool) -> DbResult<u64> {
        let mut updated = 0;
        for chunk in output_ids.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE transaction_outputs SET is_spent = ");
            builder.push_bind(is_spent).push(" WHERE id IN ");
            push_in_list(&mut builder, chunk.iter().copied());
            updated += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("update output spent state")?
                .rows_affected();
        }
        Ok(updated)
    }
}

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::chunk_size;
use crate::errors::{DbResult, QueryContext};
use crate::models::{to_db_u64, NewTransactionInput};

pub struct InputStore;

impl InputStore {
    pub async fn insert(conn: &mut SqliteConnection, inputs: &[NewTransactionInput]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in inputs.chunks(chunk_size(5)) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO transaction_inputs (transaction_id, previous_transaction_output_id, idx, \
                 signature_script, sequence) ",
            );
            builder.push_values(chunk, |mut row, input| {
                row.push_bind(input.transaction_id)
                    .push_bind(input.previous_transaction_output_id)
                    .push_bind(i64::from(input.index))
                    .push_bind(input.signature_script.as_slice())
                    .push_bind(to_db_u64(input.sequence));
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert transaction inputs")?
                .rows_affected();
        }
        Ok(inserted)
    }
}

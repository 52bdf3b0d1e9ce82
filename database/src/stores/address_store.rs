use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::{push_in_list, INSERT_CHUNK_SIZE};
use crate::errors::{DbResult, QueryContext};

pub struct AddressStore;

impl AddressStore {
    /// Maps each stored address among `addresses` to its row ID.
    pub async fn ids_by_addresses(
        conn: &mut SqliteConnection,
        addresses: &[String],
    ) -> DbResult<HashMap<String, i64>> {
        let mut ids = HashMap::with_capacity(addresses.len());
        for chunk in addresses.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new("SELECT address, id FROM addresses WHERE address IN ");
            push_in_list(&mut builder, chunk.iter().map(String::as_str));
            let rows = builder
                .build_query_as::<(String, i64)>()
                .fetch_all(&mut *conn)
                .await
                .context("load address ids")?;
            ids.extend(rows);
        }
        Ok(ids)
    }

    pub async fn insert(conn: &mut SqliteConnection, addresses: &[String]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in addresses.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::<Sqlite>::new("INSERT INTO addresses (address) ");
            builder.push_values(chunk, |mut row, address| {
                row.push_bind(address.as_str());
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert addresses")?
                .rows_affected();
        }
        Ok(inserted)
    }
}

use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::{chunk_size, push_in_list, INSERT_CHUNK_SIZE};
use crate::errors::{DbResult, QueryContext};
use crate::models::{to_db_u64, NewSubnetwork};

pub struct SubnetworkStore;

impl SubnetworkStore {
    /// Maps each stored subnetwork ID among `subnetwork_ids` to its row ID.
    pub async fn ids_by_subnetwork_ids(
        conn: &mut SqliteConnection,
        subnetwork_ids: &[String],
    ) -> DbResult<HashMap<String, i64>> {
        let mut ids = HashMap::with_capacity(subnetwork_ids.len());
        for chunk in subnetwork_ids.chunks(INSERT_CHUNK_SIZE) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("SELECT subnetwork_id, id FROM subnetworks WHERE subnetwork_id IN ");
            push_in_list(&mut builder, chunk.iter().map(String::as_str));
            let rows = builder
                .build_query_as::<(String, i64)>()
                .fetch_all(&mut *conn)
                .await
                .context("load subnetwork ids")?;
            ids.extend(rows);
        }
        Ok(ids)
    }

    pub async fn insert(conn: &mut SqliteConnection, subnetworks: &[NewSubnetwork]) -> DbResult<u64> {
        let mut inserted = 0;
        for chunk in subnetworks.chunks(chunk_size(2)) {
            let mut builder = QueryBuilder::<Sqlite>::new("INSERT INTO subnetworks (subnetwork_id, gas_limit) ");
            builder.push_values(chunk, |mut row, subnetwork| {
                row.push_bind(subnetwork.subnetwork_id.as_str())
                    .push_bind(subnetwork.gas_limit.map(to_db_u64));
            });
            inserted += builder
                .build()
                .execute(&mut *conn)
                .await
                .context("insert subnetworks")?
                .rows_affected();
        }
        Ok(inserted)
    }
}

//! Typed stores, one per table family.
//!
//! Every function takes the connection of the caller's [`DbContext`](crate::DbContext)
//! so reads and writes join whatever transaction is open.

pub mod address_store;
pub mod block_store;
pub mod input_store;
pub mod output_store;
pub mod subnetwork_store;
pub mod transaction_store;

pub use address_store::AddressStore;
pub use block_store::BlockStore;
pub use input_store::InputStore;
pub use output_store::OutputStore;
pub use subnetwork_store::SubnetworkStore;
pub use transaction_store::TransactionStore;

use sqlx::{Encode, QueryBuilder, Sqlite, Type};

/// Upper bound on rows per multi-row statement.
pub const INSERT_CHUNK_SIZE: usize = 3000;

/// SQLite's compile-time limit on `?` parameters per statement.
const SQLITE_MAX_VARIABLES: usize = 32766;

/// Rows per statement for a table bound with `columns` parameters per row.
pub(crate) fn chunk_size(columns: usize) -> usize {
    INSERT_CHUNK_SIZE.min(SQLITE_MAX_VARIABLES / columns.max(1))
}

/// Appends `(?, ?, ...)` binding each value.
pub(crate) fn push_in_list<'args, T, I>(builder: &mut QueryBuilder<'args, Sqlite>, values: I)
where
    I: IntoIterator<Item = T>,
    T: 'args + Encode<'args, Sqlite> + Send + Type<Sqlite>,
{
    builder.push("(");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::Database;
    use tempfile::TempDir;

    pub async fn migrated_database() -> (TempDir, Database) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = Database::open(&temp_dir.path().join("ledger.db")).await.unwrap();
        db.migrate().await.unwrap();
        (temp_dir, db)
    }
}

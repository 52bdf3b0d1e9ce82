//! Address registration

use std::collections::{BTreeSet, HashMap};

use database::stores::AddressStore;
use database::SqliteConnection;
use tracing::debug;

use crate::error::Result;

pub struct AddressIndexer;

impl AddressIndexer {
    /// Maps every address to its row ID, inserting the ones not stored yet.
    pub async fn resolve(conn: &mut SqliteConnection, addresses: Vec<&str>) -> Result<HashMap<String, i64>> {
        let unique: Vec<String> = addresses
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        if unique.is_empty() {
            return Ok(HashMap::new());
        }

        let mut ids = AddressStore::ids_by_addresses(conn, &unique).await?;
        let new_addresses: Vec<String> = unique.into_iter().filter(|address| !ids.contains_key(address)).collect();
        if !new_addresses.is_empty() {
            AddressStore::insert(conn, &new_addresses).await?;
            ids.extend(AddressStore::ids_by_addresses(conn, &new_addresses).await?);
            debug!("Inserted {} new addresses", new_addresses.len());
        }
        Ok(ids)
    }
}

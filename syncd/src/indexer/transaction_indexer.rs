//! Transaction indexing: subnetworks, transactions, outputs, inputs and raw data

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use database::models::{
    NewSubnetwork, NewTransaction, NewTransactionInput, NewTransactionOutput, Outpoint, RawTransaction,
};
use database::stores::{InputStore, OutputStore, SubnetworkStore, TransactionStore};
use database::SqliteConnection;
use rpc_core::{is_builtin_subnetwork, RpcApi, TransactionVerboseData, COINBASE_SUBNETWORK_ID};
use tracing::debug;

use super::address_indexer::AddressIndexer;
use super::mass::{transaction_mass, SpentScript};
use super::{decode_hex, BlockData};
use crate::error::{Result, SyncError};

/// Row IDs of the transactions contained in an ingest batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexedTransactions {
    /// Every transaction in the batch, new or previously stored
    pub row_ids: HashMap<String, i64>,
    /// Transactions inserted by this batch, in batch order
    pub new_row_ids: Vec<i64>,
}

/// Verbose transaction with its hex fields decoded.
struct DecodedTransaction<'a> {
    verbose: &'a TransactionVerboseData,
    raw: Vec<u8>,
    payload: Vec<u8>,
    output_scripts: Vec<Vec<u8>>,
    signature_scripts: Vec<Vec<u8>>,
}

impl<'a> DecodedTransaction<'a> {
    fn decode(verbose: &'a TransactionVerboseData) -> Result<Self> {
        Ok(Self {
            verbose,
            raw: decode_hex("transaction", &verbose.hex)?,
            payload: decode_hex("payload", &verbose.payload)?,
            output_scripts: verbose
                .vout
                .iter()
                .map(|output| decode_hex("script public key", &output.script_pub_key.hex))
                .collect::<Result<_>>()?,
            signature_scripts: verbose
                .vin
                .iter()
                .map(|input| decode_hex("signature script", &input.script_sig.hex))
                .collect::<Result<_>>()?,
        })
    }

    fn id(&self) -> &str {
        &self.verbose.tx_id
    }

    fn is_coinbase(&self) -> bool {
        self.verbose.subnetwork == COINBASE_SUBNETWORK_ID
    }

    fn outpoints(&self) -> impl Iterator<Item = Outpoint> + '_ {
        self.verbose.vin.iter().map(|input| Outpoint::new(input.tx_id.clone(), input.vout))
    }

    fn mass(&self, previous_scripts: &HashMap<Outpoint, Vec<u8>>) -> Result<u64> {
        let output_scripts: Vec<&[u8]> = self.output_scripts.iter().map(Vec::as_slice).collect();
        if self.is_coinbase() {
            return Ok(transaction_mass(self.raw.len() as u64, &output_scripts, &[], true));
        }

        let inputs = self
            .outpoints()
            .zip(&self.signature_scripts)
            .map(|(outpoint, signature_script)| {
                let previous = previous_scripts.get(&outpoint).ok_or_else(|| missing_output(&outpoint, self.id()))?;
                Ok(SpentScript { signature_script, previous_script_pub_key: previous })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(transaction_mass(self.raw.len() as u64, &output_scripts, &inputs, false))
    }
}

fn missing_output(outpoint: &Outpoint, transaction_id: &str) -> SyncError {
    SyncError::Consistency(format!(
        "missing previous output {} spent by transaction {}",
        outpoint, transaction_id
    ))
}

fn row_id(row_ids: &HashMap<String, i64>, transaction_id: &str) -> Result<i64> {
    row_ids
        .get(transaction_id)
        .copied()
        .ok_or_else(|| SyncError::Consistency(format!("transaction {} has no row", transaction_id)))
}

pub struct TransactionIndexer {
    rpc: Arc<dyn RpcApi>,
}

impl TransactionIndexer {
    pub fn new(rpc: Arc<dyn RpcApi>) -> Self {
        Self { rpc }
    }

    /// Stores every transaction of `blocks` not stored yet, with its
    /// outputs, inputs and raw bytes. Transactions are deduplicated by ID.
    pub async fn index(&self, conn: &mut SqliteConnection, blocks: &[&BlockData]) -> Result<IndexedTransactions> {
        let mut unique: Vec<&TransactionVerboseData> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for block in blocks {
            let mut in_block: HashSet<&str> = HashSet::new();
            for tx in &block.verbose.raw_txs {
                if !in_block.insert(tx.tx_id.as_str()) {
                    return Err(SyncError::Consistency(format!(
                        "block {} lists transaction {} more than once",
                        block.hash(),
                        tx.tx_id
                    )));
                }
                if seen.insert(tx.tx_id.as_str()) {
                    unique.push(tx);
                }
            }
        }
        if unique.is_empty() {
            return Ok(IndexedTransactions::default());
        }

        let subnetwork_ids = self.resolve_subnetworks(conn, &unique).await?;

        let transaction_ids: Vec<String> = unique.iter().map(|tx| tx.tx_id.clone()).collect();
        let mut row_ids = TransactionStore::ids_by_transaction_ids(conn, &transaction_ids).await?;
        let decoded: Vec<DecodedTransaction<'_>> = unique
            .into_iter()
            .filter(|tx| !row_ids.contains_key(&tx.tx_id))
            .map(DecodedTransaction::decode)
            .collect::<Result<_>>()?;
        if decoded.is_empty() {
            return Ok(IndexedTransactions { row_ids, new_row_ids: Vec::new() });
        }

        let previous_scripts = Self::previous_scripts(conn, &decoded).await?;
        let mut new_transactions = Vec::with_capacity(decoded.len());
        for tx in &decoded {
            let subnetwork_id = subnetwork_ids.get(&tx.verbose.subnetwork).copied().ok_or_else(|| {
                SyncError::Consistency(format!("subnetwork {} was not registered", tx.verbose.subnetwork))
            })?;
            new_transactions.push(NewTransaction {
                transaction_id: tx.verbose.tx_id.clone(),
                transaction_hash: tx.verbose.hash.clone(),
                lock_time: tx.verbose.lock_time,
                subnetwork_id,
                gas: tx.verbose.gas,
                payload_hash: tx.verbose.payload_hash.clone(),
                payload: tx.payload.clone(),
                mass: tx.mass(&previous_scripts)?,
                version: tx.verbose.version,
            });
        }
        TransactionStore::insert(conn, &new_transactions).await?;

        let new_ids: Vec<String> = decoded.iter().map(|tx| tx.id().to_string()).collect();
        let inserted = TransactionStore::ids_by_transaction_ids(conn, &new_ids).await?;
        let new_row_ids = decoded
            .iter()
            .map(|tx| row_id(&inserted, tx.id()))
            .collect::<Result<Vec<_>>>()?;
        row_ids.extend(inserted);

        Self::insert_outputs(conn, &decoded, &row_ids).await?;
        Self::insert_inputs(conn, &decoded, &row_ids).await?;

        let raw_transactions: Vec<RawTransaction> = decoded
            .iter()
            .zip(&new_row_ids)
            .map(|(tx, row_id)| RawTransaction { transaction_id: *row_id, transaction_data: tx.raw.clone() })
            .collect();
        TransactionStore::insert_raw(conn, &raw_transactions).await?;

        debug!("Indexed {} new transactions", new_row_ids.len());
        Ok(IndexedTransactions { row_ids, new_row_ids })
    }

    async fn resolve_subnetworks(
        &self,
        conn: &mut SqliteConnection,
        transactions: &[&TransactionVerboseData],
    ) -> Result<HashMap<String, i64>> {
        let unique: Vec<String> = transactions
            .iter()
            .map(|tx| tx.subnetwork.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut ids = SubnetworkStore::ids_by_subnetwork_ids(conn, &unique).await?;
        let mut new_subnetworks = Vec::new();
        for subnetwork_id in unique.iter().filter(|id| !ids.contains_key(*id)) {
            let gas_limit = if is_builtin_subnetwork(subnetwork_id) {
                None
            } else {
                self.rpc.get_subnetwork(subnetwork_id).await?.gas_limit
            };
            new_subnetworks.push(NewSubnetwork { subnetwork_id: subnetwork_id.clone(), gas_limit });
        }

        if !new_subnetworks.is_empty() {
            SubnetworkStore::insert(conn, &new_subnetworks).await?;
            let new_ids: Vec<String> = new_subnetworks.into_iter().map(|s| s.subnetwork_id).collect();
            ids.extend(SubnetworkStore::ids_by_subnetwork_ids(conn, &new_ids).await?);
            debug!("Registered {} subnetworks", new_ids.len());
        }
        Ok(ids)
    }

    /// Scripts of every output spent by `transactions`: the batch's own new
    /// outputs first, then stored outputs.
    async fn previous_scripts(
        conn: &mut SqliteConnection,
        transactions: &[DecodedTransaction<'_>],
    ) -> Result<HashMap<Outpoint, Vec<u8>>> {
        let mut scripts: HashMap<Outpoint, Vec<u8>> = HashMap::new();
        for tx in transactions {
            for (output, script) in tx.verbose.vout.iter().zip(&tx.output_scripts) {
                scripts.insert(Outpoint::new(tx.id(), output.n), script.clone());
            }
        }

        let lookup: Vec<Outpoint> = transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .flat_map(|tx| tx.outpoints())
            .filter(|outpoint| !scripts.contains_key(outpoint))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !lookup.is_empty() {
            for output in OutputStore::by_outpoints(conn, &lookup).await? {
                scripts.insert(output.outpoint, output.script_pub_key);
            }
        }
        Ok(scripts)
    }

    async fn insert_outputs(
        conn: &mut SqliteConnection,
        transactions: &[DecodedTransaction<'_>],
        row_ids: &HashMap<String, i64>,
    ) -> Result<()> {
        let addresses: Vec<&str> = transactions
            .iter()
            .flat_map(|tx| tx.verbose.vout.iter())
            .filter_map(|output| output.script_pub_key.address.as_deref())
            .collect();
        let address_ids = AddressIndexer::resolve(conn, addresses).await?;

        let mut outputs = Vec::new();
        for tx in transactions {
            let transaction_id = row_id(row_ids, tx.id())?;
            for (output, script) in tx.verbose.vout.iter().zip(&tx.output_scripts) {
                outputs.push(NewTransactionOutput {
                    transaction_id,
                    index: output.n,
                    value: output.value,
                    script_pub_key: script.clone(),
                    address_id: output
                        .script_pub_key
                        .address
                        .as_deref()
                        .and_then(|address| address_ids.get(address).copied()),
                });
            }
        }
        OutputStore::insert(conn, &outputs).await?;
        Ok(())
    }

    async fn insert_inputs(
        conn: &mut SqliteConnection,
        transactions: &[DecodedTransaction<'_>],
        row_ids: &HashMap<String, i64>,
    ) -> Result<()> {
        let outpoints: Vec<Outpoint> = transactions
            .iter()
            .flat_map(|tx| tx.outpoints())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if outpoints.is_empty() {
            return Ok(());
        }

        let output_ids: HashMap<Outpoint, i64> = OutputStore::by_outpoints(conn, &outpoints)
            .await?
            .into_iter()
            .map(|output| (output.outpoint, output.id))
            .collect();

        let mut inputs = Vec::new();
        for tx in transactions {
            let transaction_id = row_id(row_ids, tx.id())?;
            for (index, ((outpoint, input), signature_script)) in
                tx.outpoints().zip(&tx.verbose.vin).zip(&tx.signature_scripts).enumerate()
            {
                let previous_transaction_output_id =
                    output_ids.get(&outpoint).copied().ok_or_else(|| missing_output(&outpoint, tx.id()))?;
                inputs.push(NewTransactionInput {
                    transaction_id,
                    previous_transaction_output_id,
                    index: index as u32,
                    signature_script: signature_script.clone(),
                    sequence: input.sequence,
                });
            }
        }
        InputStore::insert(conn, &inputs).await?;
        Ok(())
    }
}

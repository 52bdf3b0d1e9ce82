//! Chain synchronization and indexing engine

pub mod address_indexer;
pub mod ancestors;
pub mod block_indexer;
pub mod chain_acceptance;
pub mod mass;
pub mod pending;
pub mod service;
pub mod transaction_indexer;

pub use ancestors::AncestorResolver;
pub use block_indexer::{BlockIndexer, IngestSummary};
pub use chain_acceptance::{ChainAcceptance, ChainUpdate};
pub use pending::{PendingChainChange, PendingChainChanges};
pub use service::IndexerService;

use rpc_core::{BlockVerboseData, GetBlocksResponse, RpcApi};

use crate::error::{Result, SyncError};

/// A block as received from the peer: serialized bytes plus verbose fields.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockData {
    pub raw: Vec<u8>,
    pub verbose: BlockVerboseData,
}

impl BlockData {
    pub fn from_hex(block_hex: &str, verbose: BlockVerboseData) -> Result<Self> {
        let raw = decode_hex("block", block_hex)?;
        Ok(Self { raw, verbose })
    }

    pub fn hash(&self) -> &str {
        &self.verbose.hash
    }

    pub fn parent_hashes(&self) -> &[String] {
        &self.verbose.parent_hashes
    }

    /// Pairs up the parallel arrays of a `getBlocks` page.
    pub fn from_blocks_response(response: GetBlocksResponse) -> Result<Vec<Self>> {
        let GetBlocksResponse { block_hashes, block_hexes, block_verbose_data } = response;
        if block_hexes.len() != block_hashes.len() || block_verbose_data.len() != block_hashes.len() {
            return Err(SyncError::InvalidData(format!(
                "getBlocks returned {} hashes, {} raw blocks and {} verbose blocks",
                block_hashes.len(),
                block_hexes.len(),
                block_verbose_data.len()
            )));
        }

        block_hashes
            .iter()
            .zip(block_hexes.iter())
            .zip(block_verbose_data)
            .map(|((hash, block_hex), verbose)| {
                if &verbose.hash != hash {
                    return Err(SyncError::InvalidData(format!(
                        "getBlocks verbose data for {} is out of order (got {})",
                        hash, verbose.hash
                    )));
                }
                Self::from_hex(block_hex, verbose)
            })
            .collect()
    }
}

/// Fetches one block with raw and verbose data.
pub async fn fetch_block(rpc: &dyn RpcApi, hash: &str) -> Result<BlockData> {
    let response = rpc.get_block(hash, true, true).await?;
    match (response.block_hex, response.block_verbose_data) {
        (Some(block_hex), Some(verbose)) if verbose.hash == hash => BlockData::from_hex(&block_hex, verbose),
        (Some(_), Some(verbose)) => Err(SyncError::InvalidData(format!(
            "requested block {} but peer returned {}",
            hash, verbose.hash
        ))),
        _ => Err(SyncError::InvalidData(format!("peer returned incomplete data for block {}", hash))),
    }
}

pub(crate) fn decode_hex(what: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| SyncError::InvalidData(format!("invalid {} hex: {}", what, e)))
}

//! Payloads published to subscribers

use serde::Serialize;

use rpc_core::ChainBlock;

/// Published on every selected parent chain change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedParentChainPayload {
    pub removed_block_hashes: Vec<String>,
    pub added_blocks: Vec<AddedChainBlockPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedChainBlockPayload {
    pub hash: String,
    pub accepted_block_hashes: Vec<String>,
}

impl SelectedParentChainPayload {
    pub fn new(removed: &[String], added: &[ChainBlock]) -> Self {
        Self {
            removed_block_hashes: removed.to_vec(),
            added_blocks: added
                .iter()
                .map(|block| AddedChainBlockPayload {
                    hash: block.hash.clone(),
                    accepted_block_hashes: block.accepted_blocks.iter().map(|accepted| accepted.hash.clone()).collect(),
                })
                .collect(),
        }
    }
}

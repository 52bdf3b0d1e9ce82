//! BlockDAG ledger sync daemon
//!
//! Follows a full node's block and selected parent chain notifications,
//! indexes them into a relational store and republishes change events.

pub mod cli;
pub mod config;
pub mod error;
pub mod indexer;
pub mod models;
pub mod notifications;
pub mod rpc_client;

pub use config::Config;
pub use error::{Result, SyncError};
pub use indexer::IndexerService;

//! Error types for the sync daemon

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("RPC error: {0}")]
    Rpc(#[from] rpc_core::RpcError),

    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Pending chain change stalled after {retries} retries: {description}")]
    PendingChainStalled { retries: u32, description: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Fatal errors mean the store and the peer disagree, or subscribers can
    /// no longer be told about committed state. Everything else is transient
    /// and the run can simply be restarted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Consistency(_) | SyncError::Publish(_) | SyncError::PendingChainStalled { .. }
        )
    }

    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            2
        } else {
            1
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(database::DbError::Sqlx(err))
    }
}

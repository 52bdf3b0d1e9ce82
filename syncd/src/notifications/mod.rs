//! Change events published to downstream subscribers

pub mod dispatcher;
pub mod publisher;

pub use dispatcher::NotificationDispatcher;
pub use publisher::{Publisher, RedisPublisher};

pub const BLOCKS_TOPIC: &str = "dag/blocks";
pub const TRANSACTIONS_TOPIC: &str = "transactions";
pub const ACCEPTED_TRANSACTIONS_TOPIC: &str = "transactions/accepted";
pub const UNACCEPTED_TRANSACTIONS_TOPIC: &str = "transactions/unaccepted";
pub const SELECTED_TIP_TOPIC: &str = "dag/selected-tip";
pub const SELECTED_PARENT_CHAIN_TOPIC: &str = "dag/selected-parent-chain";

/// Per-address variant of a transaction topic.
pub fn address_topic(topic: &str, address: &str) -> String {
    format!("{}/{}", topic, address)
}

pub mod api;
pub mod model;

pub use api::{NotificationApi, Notifications, RpcApi};
pub use model::*;

pub mod db;
pub mod errors;
pub mod models;
pub mod queries;
pub mod stores;

pub use db::{Database, DbContext};
pub use errors::{DbError, DbResult};
pub use sqlx::SqliteConnection;

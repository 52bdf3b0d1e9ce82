//! Connection pool, transaction context and schema gate

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::errors::{DbError, DbResult, QueryContext};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const MAX_CONNECTIONS: u32 = 20;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database file at `database_path`.
    pub async fn open(database_path: &Path) -> DbResult<Self> {
        if let Some(parent) = database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> DbResult<Self> {
        let options = options.journal_mode(SqliteJournalMode::Wal).foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies every embedded migration that has not run yet.
    pub async fn migrate(&self) -> DbResult<()> {
        MIGRATOR.run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Fails unless every embedded migration has been applied successfully.
    pub async fn ensure_schema_current(&self) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;

        let has_migrations_table: Option<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
        )
        .fetch_optional(&mut *conn)
        .await
        .context("look up migrations table")?;

        let applied: HashSet<i64> = if has_migrations_table.is_some() {
            sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = TRUE")
                .fetch_all(&mut *conn)
                .await
                .context("read applied migrations")?
                .into_iter()
                .collect()
        } else {
            HashSet::new()
        };

        let pending: Vec<String> = MIGRATOR
            .iter()
            .filter(|migration| !applied.contains(&migration.version))
            .map(|migration| format!("{}_{}", migration.version, migration.description))
            .collect();

        if !pending.is_empty() {
            return Err(DbError::SchemaNotCurrent(format!(
                "pending migrations: {} (run with --migrate)",
                pending.join(", ")
            )));
        }

        debug!("Database schema is current ({} migrations)", applied.len());
        Ok(())
    }

    /// Context for statements that run outside a transaction.
    pub async fn context(&self) -> DbResult<DbContext> {
        let conn = self.pool.acquire().await.context("acquire connection")?;
        Ok(DbContext::NoTx(conn))
    }

    /// Context whose statements commit or roll back together.
    pub async fn begin(&self) -> DbResult<DbContext> {
        let tx = self.pool.begin().await.context("begin transaction")?;
        Ok(DbContext::Tx(tx))
    }
}

/// Handle threaded through every store call.
///
/// An uncommitted `Tx` rolls back when dropped, so any error path that
/// returns early leaves the store untouched.
pub enum DbContext {
    NoTx(PoolConnection<Sqlite>),
    Tx(Transaction<'static, Sqlite>),
}

impl DbContext {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        match self {
            DbContext::NoTx(conn) => &mut **conn,
            DbContext::Tx(tx) => &mut **tx,
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, DbContext::Tx(_))
    }

    pub async fn commit(self) -> DbResult<()> {
        match self {
            DbContext::Tx(tx) => tx.commit().await.context("commit transaction"),
            DbContext::NoTx(_) => Ok(()),
        }
    }
}

use std::time::Duration;

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use sync_core::{SyncError, SyncResult};
use tokio_postgres::NoTls;

/// Default number of messages per INSERT statement.
pub const DEFAULT_MESSAGE_SUB_BATCH_SIZE: usize = 10_000;

/// Destination connection options (library type without clap)
#[derive(Clone, Debug)]
pub struct PostgresOpts {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_size: usize,
    /// Deadline for each pool checkout, statement and commit.
    pub operation_timeout: Duration,
    pub message_sub_batch_size: usize,
}

impl Default for PostgresOpts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "chatdb".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            pool_size: 16,
            operation_timeout: Duration::from_secs(30),
            message_sub_batch_size: DEFAULT_MESSAGE_SUB_BATCH_SIZE,
        }
    }
}

/// Build the shared connection pool. Connections are opened lazily on checkout.
pub fn create_pool(opts: &PostgresOpts) -> SyncResult<Pool> {
    let mut config = Config::new();
    config.host = Some(opts.host.clone());
    config.port = Some(opts.port);
    config.dbname = Some(opts.database.clone());
    config.user = Some(opts.user.clone());
    config.password = Some(opts.password.clone());
    config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    config.pool = Some(PoolConfig::new(opts.pool_size.max(1)));

    config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| SyncError::Setup(format!("Failed to create PostgreSQL pool: {e}")))
}

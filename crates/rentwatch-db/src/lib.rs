use std::time::Duration;

use rentwatch_core::AppConfig;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use thiserror::Error;

pub mod compaction;
pub mod images;
pub mod snapshots;
pub mod tunnel;

pub use compaction::{
    build_compaction_sql, compact, comparison_columns, count_redundant, ensure_history_index,
    CompactionReport, CompactionSpec, SqlMode,
};
pub use images::{apply_image_statuses, insert_new_images, list_images_by_status};
pub use snapshots::{append_snapshots, list_observations};
pub use tunnel::{with_store, SshTunnel};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

// Path relative to crates/rentwatch-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Connections older than this are closed and replaced.
    pub max_lifetime_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            max_lifetime_secs: DEFAULT_MAX_LIFETIME_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
            max_lifetime_secs: config.db_max_lifetime_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("neither DATABASE_URL nor RENTWATCH_DB_NAME is set")]
    MissingDatabaseUrl,
    #[error("invalid SQL identifier \"{name}\": {reason}")]
    InvalidIdentifier { name: String, reason: String },
    #[error("table \"{0}\" does not exist or has no columns")]
    UnknownTable(String),
    #[error("unknown download status {0} in images table")]
    InvalidStatus(i16),
    #[error("SSH tunnel error: {0}")]
    Tunnel(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Connection options for the durable store as configured, before any tunnel
/// rewrites the host and port.
///
/// `DATABASE_URL` wins when set; otherwise the discrete `RENTWATCH_DB_*`
/// settings are used.
///
/// # Errors
///
/// Returns [`DbError::MissingDatabaseUrl`] if neither a URL nor a database
/// name is configured, or [`DbError::Sqlx`] if the URL does not parse.
pub fn connect_options(config: &AppConfig) -> Result<PgConnectOptions, DbError> {
    if let Some(url) = &config.database_url {
        return Ok(url.parse::<PgConnectOptions>()?);
    }
    let Some(name) = &config.db_name else {
        return Err(DbError::MissingDatabaseUrl);
    };

    let mut options = PgConnectOptions::new()
        .host(&config.db_host)
        .port(config.db_port)
        .database(name);
    if let Some(user) = &config.db_user {
        options = options.username(user);
    }
    if let Some(password) = &config.db_password {
        options = options.password(password);
    }
    Ok(options)
}

/// Connect to a Postgres pool using explicit options and config.
///
/// Every connection is checked with a round trip before it is handed out and
/// recycled after `max_lifetime_secs`.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool_with(
    options: PgConnectOptions,
    config: PoolConfig,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true)
        .connect_with(options)
        .await
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the URL is invalid or the connection cannot be
/// established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    connect_pool_with(database_url.parse()?, config).await
}

/// Run all pending migrations against the pool.
///
/// Returns the number of migrations that were applied.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    // _sqlx_migrations does not exist on a fresh database; count that as zero.
    let applied_before = applied_migrations(pool).await;
    MIGRATOR.run(pool).await?;
    let applied_after = applied_migrations(pool).await;

    let delta = (applied_after - applied_before).max(0);
    Ok(usize::try_from(delta).unwrap_or(0))
}

async fn applied_migrations(pool: &PgPool) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
        .fetch_one(pool)
        .await
        .unwrap_or(0)
}

/// Send a `SELECT 1` to verify the pool has a live connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Run a full health check: ping the pool and return a typed error on failure.
///
/// # Errors
///
/// Returns [`DbError`] if the ping fails.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    ping(pool).await?;
    Ok(())
}

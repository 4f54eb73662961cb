//! Database fixtures for content store tests.

use binstore_core::StoreConfig;
use binstore_database::{ContentStore, DatabaseError, DatabaseResult};
use sqlx::any::AnyPoolOptions;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, AnyPool, Connection};
use std::time::Duration;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
/// Tests use this marker to decide whether to skip due to unavailable Docker.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// Route store logs to the test output. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "binstore_database=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A file-backed SQLite database that is removed on drop.
///
/// In-memory SQLite is private to each connection, so a temp file is used to
/// let several connections see the same table.
#[allow(dead_code)]
pub struct TestDatabase {
    pub pool: AnyPool,
    url: String,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestDatabase {
    pub async fn new() -> Self {
        Self::with_max_connections(5).await
    }

    /// A database whose pool hands out at most `max` connections, failing
    /// fast when they are all checked out.
    pub async fn with_max_connections(max: u32) -> Self {
        init_tracing();
        sqlx::any::install_default_drivers();

        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("content.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = AnyPoolOptions::new()
            .max_connections(max)
            .acquire_timeout(Duration::from_secs(2))
            .connect(&url)
            .await
            .expect("Failed to open SQLite pool");

        Self {
            pool,
            url,
            _temp_dir: temp_dir,
        }
    }

    /// A pooled connection.
    pub async fn acquire(&self) -> PoolConnection<Any> {
        self.pool
            .acquire()
            .await
            .expect("Failed to acquire connection")
    }

    /// A standalone connection outside the pool.
    pub async fn connect(&self) -> AnyConnection {
        AnyConnection::connect(&self.url)
            .await
            .expect("Failed to open connection")
    }

    /// Open a store with default settings.
    pub async fn open_store(&self) -> ContentStore {
        self.open_store_with(&StoreConfig::default())
            .await
            .expect("Failed to open content store")
    }

    pub async fn open_store_with(&self, config: &StoreConfig) -> DatabaseResult<ContentStore> {
        let mut conn = self.acquire().await;
        ContentStore::open(&mut conn, config).await
    }
}

/// PostgreSQL database in a testcontainer.
#[allow(dead_code)]
pub struct PostgresTestDatabase {
    pub pool: AnyPool,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestDatabase {
    pub async fn new() -> DatabaseResult<Self> {
        init_tracing();
        sqlx::any::install_default_drivers();

        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                DatabaseError::Configuration(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
        let pool = AnyPoolOptions::new().max_connections(5).connect(&url).await?;

        Ok(Self {
            pool,
            _container: container,
        })
    }

    pub async fn acquire(&self) -> PoolConnection<Any> {
        self.pool
            .acquire()
            .await
            .expect("Failed to acquire connection")
    }
}

/// Try to start a PostgreSQL database, skipping if Docker is unavailable or
/// SKIP_POSTGRES_TESTS is set.
///
/// Only container-start failures cause a skip; connection errors still panic.
#[allow(dead_code)]
pub async fn postgres_or_skip() -> Option<PostgresTestDatabase> {
    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return None;
    }
    match PostgresTestDatabase::new().await {
        Ok(db) => Some(db),
        Err(err) => {
            let msg = err.to_string();
            if msg.contains(POSTGRES_CONTAINER_START_ERR_PREFIX) {
                eprintln!("Skipping PostgreSQL test (Docker unavailable): {msg}");
                None
            } else {
                panic!("PostgreSQL test setup failed: {msg}");
            }
        }
    }
}

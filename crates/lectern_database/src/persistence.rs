//! Pool setup, migrations and persistence contexts.

use crate::connection::PgPool;
use crate::{DatabaseResult, PgLedgerStore, PgRunStore, PgSessionStore};
use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use lectern_error::{DatabaseError, DatabaseErrorKind, StorageError};
use lectern_interface::{PersistenceContext, PersistenceProvider};
use std::sync::Arc;
use tracing::{info, instrument};

/// Schema migrations bundled into the binary.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Default maximum number of pooled connections.
const DEFAULT_POOL_SIZE: u32 = 10;

/// PostgreSQL persistence backed by an r2d2 pool.
///
/// Every context shares the pool and checks out a connection per query,
/// so writes from background runs commit independently.
#[derive(Debug, Clone)]
pub struct PgPersistence {
    pool: PgPool,
}

impl PgPersistence {
    /// Connect using `DATABASE_URL`.
    pub fn from_env() -> DatabaseResult<Self> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            DatabaseError::new(DatabaseErrorKind::Connection(
                "DATABASE_URL environment variable not set".to_string(),
            ))
        })?;
        Self::connect(&database_url, DEFAULT_POOL_SIZE)
    }

    /// Build a pool for `database_url` and verify a connection can be made.
    #[instrument(skip(database_url))]
    pub fn connect(database_url: &str, pool_size: u32) -> DatabaseResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| {
                DatabaseError::new(DatabaseErrorKind::Pool(format!(
                    "Failed to create connection pool: {}",
                    e
                )))
            })?;

        info!(pool_size, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn run_migrations(&self) -> DatabaseResult<usize> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::new(DatabaseErrorKind::Pool(e.to_string())))?;
            let applied = conn
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| DatabaseError::new(DatabaseErrorKind::Migration(e.to_string())))?;
            info!(applied = applied.len(), "Migrations applied");
            Ok(applied.len())
        })
        .await
        .map_err(|e| DatabaseError::new(DatabaseErrorKind::Migration(e.to_string())))?
    }

    /// A set of store handles over the shared pool.
    pub fn context(&self) -> PersistenceContext {
        PersistenceContext {
            runs: Arc::new(PgRunStore::new(self.pool.clone())),
            ledger: Arc::new(PgLedgerStore::new(self.pool.clone())),
            sessions: Arc::new(PgSessionStore::new(self.pool.clone())),
        }
    }
}

#[async_trait]
impl PersistenceProvider for PgPersistence {
    async fn open_context(&self) -> Result<PersistenceContext, StorageError> {
        Ok(self.context())
    }
}

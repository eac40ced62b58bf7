//! Pooled connections and error mapping.

use lectern_error::{DatabaseError, StorageError, StorageErrorKind};
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind as DieselErrorKind, Error as DieselError};
use std::fmt::Display;

/// Connection pool shared by the PostgreSQL stores.
pub type PgPool = Pool<ConnectionManager<PgConnection>>;

fn unavailable(message: String) -> StorageError {
    StorageError::new(StorageErrorKind::Unavailable(message))
}

/// Report a database failure through the storage contract.
pub(crate) fn storage_error(err: DatabaseError) -> StorageError {
    unavailable(err.kind.to_string())
}

/// Map a failed write, reporting unique violations as duplicates.
pub(crate) fn write_error(
    entity: &'static str,
    id: impl Display,
    duplicate: fn(&'static str, String) -> StorageErrorKind,
) -> impl FnOnce(DieselError) -> StorageError {
    move |err| match err {
        DieselError::DatabaseError(DieselErrorKind::UniqueViolation, _) => {
            StorageError::new(duplicate(entity, id.to_string()))
        }
        other => storage_error(DatabaseError::from(other)),
    }
}

/// Map a failed read or update.
pub(crate) fn query_error(err: DieselError) -> StorageError {
    storage_error(DatabaseError::from(err))
}

/// Run a blocking query on a pooled connection.
pub(crate) async fn with_connection<T, F>(pool: &PgPool, f: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, StorageError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| unavailable(format!("Failed to get connection from pool: {}", e)))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| unavailable(format!("Database task failed: {}", e)))?
}

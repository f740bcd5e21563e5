//! Connection pool setup and migration runner for the per-user queue database.

use std::path::Path;

use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use matchops_sync_types::SyncError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

pub fn create_pool(db_path: &Path) -> Result<SqlitePool, SyncError> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path.to_string_lossy());
    r2d2::Pool::builder()
        .build(manager)
        .map_err(|e| SyncError::Queue(format!("failed to build connection pool: {e}")))
}

pub fn run_migrations(pool: &SqlitePool) -> Result<(), SyncError> {
    let mut conn = get_connection(pool)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| SyncError::Queue(format!("migration failed: {e}")))?;
    Ok(())
}

pub fn get_connection(
    pool: &SqlitePool,
) -> Result<r2d2::PooledConnection<ConnectionManager<SqliteConnection>>, SyncError> {
    pool.get()
        .map_err(|e| SyncError::Queue(format!("failed to acquire connection: {e}")))
}

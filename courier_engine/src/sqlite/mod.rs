pub mod db;
mod sqlite_impl;

pub use db::{db_url, new_pool};
pub use sqlite_impl::SqliteDatabase;

use log::info;
use sqlx::SqlitePool;

/// Runs the engine's schema migrations against the given pool.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./src/sqlite/migrations").run(pool).await?;
    info!("🗃️ Migrations complete");
    Ok(())
}

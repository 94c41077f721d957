pub mod repository;
pub mod sqlite;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;

use crate::error::Result;

pub enum DatabasePool {
    Sqlite(SqlitePool),
}

impl DatabasePool {
    /// Open (creating if missing) a SQLite database file and run migrations.
    pub async fn new_sqlite(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::run_migrations(&pool).await?;
        Ok(DatabasePool::Sqlite(pool))
    }

    /// Create a new in-memory SQLite database pool and run migrations. Useful for testing.
    pub async fn new_sqlite_memory() -> Result<Self> {
        // A single connection, otherwise every pooled connection gets its own empty database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(DatabasePool::Sqlite(pool))
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        let migrations: &[&str] = &[include_str!(
            "../../../../migrations/sqlite/001_initial_schema.sql"
        )];

        for migration_sql in migrations {
            for statement in migration_sql.split(';') {
                let trimmed = statement.trim();
                if trimmed.is_empty() || is_comment_only(trimmed) {
                    continue;
                }
                let result = sqlx::query(trimmed).execute(pool).await;
                if let Err(e) = &result {
                    if e.to_string().contains("already exists") {
                        continue;
                    }
                    result?;
                }
            }
        }
        Ok(())
    }
}

fn is_comment_only(statement: &str) -> bool {
    statement
        .lines()
        .all(|line| line.trim().is_empty() || line.trim_start().starts_with("--"))
}

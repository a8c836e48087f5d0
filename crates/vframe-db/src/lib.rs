//! Postgres persistence for the vframe worker.
//!
//! This crate provides:
//! - Connection pool creation from environment configuration
//! - Embedded schema migrations
//! - Repositories for jobs (`videos`) and users

pub mod error;
pub mod models;
pub mod repositories;

use sqlx::postgres::PgPoolOptions;

pub use error::{DbError, DbResult};
pub use repositories::{PgJobRepository, PgUserRepository};

pub type DbPool = sqlx::PgPool;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full connection URL
    pub database_url: String,
    /// Pool size
    pub max_connections: u32,
}

impl DbConfig {
    /// Create config from environment variables.
    ///
    /// `DATABASE_URL` wins; otherwise the URL is assembled from `DB_USER`,
    /// `DB_PASSWORD`, `DB_HOST`, `DB_PORT` and `DB_NAME`.
    pub fn from_env() -> DbResult<Self> {
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                let name = std::env::var("DB_NAME")
                    .map_err(|_| DbError::Config("DB_NAME or DATABASE_URL must be set".into()))?;
                Self::url_from_parts(
                    &std::env::var("DB_USER").unwrap_or_default(),
                    &std::env::var("DB_PASSWORD").unwrap_or_default(),
                    &std::env::var("DB_HOST").unwrap_or_else(|_| "db".to_string()),
                    &std::env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string()),
                    &name,
                )
            }
        };

        Ok(Self {
            database_url,
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        })
    }

    fn url_from_parts(user: &str, password: &str, host: &str, port: &str, name: &str) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            user, password, host, port, name
        )
    }
}

/// Create a connection pool and verify it with a ping.
pub async fn create_pool(config: &DbConfig) -> DbResult<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    health_check(&pool).await?;
    Ok(pool)
}

/// Run a trivial query to confirm the database answers.
pub async fn health_check(pool: &DbPool) -> DbResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &DbPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

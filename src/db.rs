use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;

use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Type alias for the shared database handle.
pub type DbPool = DatabaseConnection;

/// Establishes the connection pool from application config. Supports both
/// Postgres (production) and SQLite (tests, local development).
pub async fn establish_connection(config: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(config.db_sqlx_logging);

    let pool = Database::connect(options).await?;
    info!(
        max_connections = config.db_max_connections,
        "database connection established"
    );
    Ok(pool)
}

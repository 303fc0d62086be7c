use crate::config::AppConfig;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{error, info};

pub type DbPool = DatabaseConnection;

/// Opens the connection pool with tuning taken from the application
/// config. Works against Postgres in deployment and SQLite in tests;
/// the URL decides.
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut opts = ConnectOptions::new(cfg.database_url.clone());
    opts.max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(cfg.db_connect_timeout_secs))
        .acquire_timeout(Duration::from_secs(cfg.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(cfg.db_idle_timeout_secs))
        .sqlx_logging(cfg.is_development());

    info!(
        max_connections = cfg.db_max_connections,
        "Opening database pool"
    );

    let pool = Database::connect(opts)
        .await
        .map_err(ServiceError::DatabaseError)?;

    info!("Database pool ready");
    Ok(pool)
}

/// Applies all embedded migrations that have not run yet.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    let start = std::time::Instant::now();

    match crate::migrator::Migrator::up(pool, None).await {
        Ok(()) => {
            info!(elapsed = ?start.elapsed(), "Migrations applied");
            Ok(())
        }
        Err(e) => {
            error!(elapsed = ?start.elapsed(), error = %e, "Migration run failed");
            Err(ServiceError::DatabaseError(e))
        }
    }
}

use std::time::Duration;

use hoard_core::Config;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Open the connection pool described by the configuration.
pub async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let base = config.base();
    let pool = PgPoolOptions::new()
        .max_connections(base.db_max_connections)
        .acquire_timeout(Duration::from_secs(base.db_timeout_seconds))
        .connect(&base.database_url)
        .await?;

    tracing::info!(
        max_connections = base.db_max_connections,
        "Database pool established"
    );

    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

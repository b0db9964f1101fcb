pub mod tenant;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run the public-schema migrations embedded in ./migrations/
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Re-provision all active tenant schemas (idempotent — safe to call on every startup).
pub async fn migrate_all_existing_tenants(pool: &PgPool) -> anyhow::Result<()> {
    let slugs = active_center_slugs(pool).await?;

    for slug in slugs {
        tenant::provision_tenant_schema(pool, &slug).await?;
        tracing::info!("Migrated tenant schema: {}", tenant::schema_name(&slug));
    }
    Ok(())
}

pub async fn active_center_slugs(pool: &PgPool) -> anyhow::Result<Vec<String>> {
    let slugs: Vec<String> = sqlx::query_scalar(
        "SELECT slug FROM public.centers WHERE is_active = TRUE ORDER BY slug",
    )
    .fetch_all(pool)
    .await?;
    Ok(slugs)
}

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutorcenter_api::{
    build_router,
    config::Config,
    db,
    services::{fee_reminder_scheduler, metrics, sms::SmsService},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    db::migrate_all_existing_tenants(&pool).await?;
    info!("Database connected and migrations applied");

    for slug in db::active_center_slugs(&pool).await? {
        SmsService::release_interrupted(&pool, &slug).await?;
    }

    let redis = redis::Client::open(config.redis_url.as_str())?;
    // Fail fast on a bad Redis URL; later outages only degrade rate limiting.
    redis.get_multiplexed_async_connection().await?;
    info!("Redis connected");

    let state = AppState::new(pool.clone(), redis.clone(), config.clone());
    if state.email.is_some() {
        info!("SMTP email service configured");
    } else {
        info!("SMTP not configured, email features disabled");
    }

    metrics::start(pool.clone());
    fee_reminder_scheduler::start(
        pool,
        state.email.clone(),
        redis,
        config.app_base_url.clone(),
    );

    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("tutor center API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

use std::sync::Arc;

use chrono::Utc;

use wanderpool::{
    config::AppConfig,
    db::Db,
    logger::init_tracing,
    ops::CoreService,
    ports::{LogNotifier, MockPayments},
    scheduler,
    store::SqlxStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting wanderpool backend...");

    let cfg = AppConfig::from_env();
    cfg.compat.weights.validate()?;

    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let store = Arc::new(SqlxStore::new(db.pool.clone()));

    // TODO: swap in the production payment provider and notification
    // transport once their credentials land in deployment config.
    let payments = Arc::new(MockPayments::new());
    let notifier = Arc::new(LogNotifier);

    let service = CoreService::new(store, payments, notifier, cfg.clone());

    // Safety: one-shot deadline timers are reconstructed from persisted
    // confirmation deadlines before any job runs.
    let rearmed = service.recover_timers(Utc::now()).await?;
    tracing::info!(rearmed, "startup recovery complete");

    scheduler::start_jobs(Arc::clone(&service), cfg.scheduler.clone());

    tracing::info!("Backend started; waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    Ok(())
}

//! OpenSASE Returns - return and refund workflow service

use anyhow::Result;
use opensase_returns::{api, config::Config, notify::NatsNotifier, store::{MemoryStore, PgStore, Repository}};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let repo: Arc<dyn Repository> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect(url, config.db_max_connections).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let notifier = Arc::new(NatsNotifier::connect(config.nats_url.as_deref()).await);

    let (state, refund_worker, refund_jobs) = api::AppState::build(repo, notifier, &config.workflow);
    refund_worker.spawn(refund_jobs);
    let app = api::router(state);

    tracing::info!("🚀 OpenSASE Returns listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}

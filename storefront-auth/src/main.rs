//! Storefront auth gateway

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_auth::{
    routes, AppState, Config, InMemorySessionStore, InMemoryUserStore, SessionStore, SqliteStore,
    UserStore,
};

/// How often expired sessions and one-time tokens are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_auth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    for problem in config.validate()? {
        tracing::warn!("{}", problem);
    }
    tracing::info!(?config, "Loaded configuration");

    match config.database_path.clone() {
        Some(path) => {
            let store = Arc::new(SqliteStore::open(&path)?);
            tracing::info!(path = %path, "Using SQLite storage");
            serve(&config, store.clone(), store).await
        }
        None => {
            tracing::info!("Using in-memory storage");
            serve(&config, InMemoryUserStore::new(), InMemorySessionStore::new()).await
        }
    }
}

async fn serve<U, S>(config: &Config, user_store: U, session_store: S) -> Result<()>
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    let state = Arc::new(AppState::from_config(config, user_store, session_store)?);
    spawn_sweeper(state.clone());

    let app = routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Auth gateway listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_sweeper<U, S>(state: Arc<AppState<U, S>>)
where
    U: UserStore + 'static,
    S: SessionStore + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match state.ledger.purge_expired(Utc::now()) {
                Ok(0) => {}
                Ok(n) => tracing::debug!(count = n, "Purged expired one-time tokens"),
                Err(e) => tracing::warn!(error = %e, "Token purge failed"),
            }
            match state.session_store.cleanup_expired() {
                Ok(0) => {}
                Ok(n) => tracing::debug!(count = n, "Removed expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
            }
        }
    });
}

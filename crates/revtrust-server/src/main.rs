mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use revtrust_db::{AnalysisStore, PgAnalysisStore};

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
};

const QUEUE_SLOTS_PER_WORKER: usize = 64;
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(revtrust_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = revtrust_db::PoolConfig::from_app_config(&config);
    let pool = revtrust_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = revtrust_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    let store: Arc<dyn AnalysisStore> = Arc::new(PgAnalysisStore::new(pool));
    let services = revtrust_pipeline::build_services(&config, Arc::clone(&store))?;

    let (queue, workers) = revtrust_pipeline::spawn_workers(
        Arc::clone(&services.pipeline),
        config.worker_concurrency,
        config.worker_concurrency.max(1) * QUEUE_SLOTS_PER_WORKER,
    );

    let mut scheduler = scheduler::build_scheduler(Arc::clone(&store), queue.clone()).await?;

    let auth = AuthState::from_env(matches!(config.env, revtrust_core::Environment::Development))?;
    let app = build_app(
        AppState {
            store,
            queue,
            credentials: Arc::clone(&services.egress.credentials),
            routes: Arc::clone(&services.egress.routes),
        },
        auth,
        default_rate_limit_state(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, workers = config.worker_concurrency, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "scheduler did not shut down cleanly");
    }
    drop(scheduler);
    if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, workers.join())
        .await
        .is_err()
    {
        tracing::warn!("workers still busy at shutdown; abandoning in-flight jobs");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}

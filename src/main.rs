//! live-quiz-back binary entrypoint wiring the REST and SSE layers to the fast
//! and durable stores.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_quiz_back::{
    config::AppConfig,
    dao::{
        durable_store::{DurableStore, memory::MemoryDurableStore},
        fast_store::{FastStore, memory::MemoryFastStore},
    },
    routes,
    services::{catalog, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let fast = connect_fast_store().await?;
    let app_state = AppState::new(config, fast);
    let _background = app_state.spawn_background_tasks();
    app_state.guard().on_transition(Box::new(|available| {
        if available {
            info!("durable store available");
        } else {
            warn!("durable store unavailable; parking writes in the fast store");
        }
    }));

    start_durable_store(&app_state);

    if let Some(path) = app_state.config().seed_quizzes_path.clone() {
        if let Err(err) = catalog::seed_from_file(app_state.catalog().as_ref(), &path).await {
            warn!(error = %err, "quiz seeding skipped");
        }
    }

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Redis when `REDIS_URL` is set, otherwise the in-process store.
async fn connect_fast_store() -> anyhow::Result<Arc<dyn FastStore>> {
    #[cfg(feature = "redis-store")]
    {
        if let Ok(url) = env::var("REDIS_URL") {
            let store = live_quiz_back::dao::fast_store::redis::RedisFastStore::connect(&url)
                .await
                .context("connecting to Redis")?;
            info!("using Redis fast store");
            return Ok(Arc::new(store));
        }
    }

    info!("REDIS_URL not set; using in-memory fast store");
    Ok(Arc::new(MemoryFastStore::new()))
}

/// Supervise MongoDB when `MONGO_URI` is set; otherwise install the in-process store.
fn start_durable_store(state: &SharedState) {
    #[cfg(feature = "mongo-store")]
    {
        if let Ok(uri) = env::var("MONGO_URI") {
            use live_quiz_back::dao::{
                durable_store::mongodb::{MongoConfig, MongoDurableStore},
                storage::StorageError,
            };

            let db_name = env::var("MONGO_DB").ok();
            tokio::spawn(storage_supervisor::run(state.guard().clone(), move || {
                let uri = uri.clone();
                let db_name = db_name.clone();
                async move {
                    let config = MongoConfig::from_uri(&uri, db_name.as_deref())
                        .await
                        .map_err(StorageError::from)?;
                    let store = MongoDurableStore::connect(config)
                        .await
                        .map_err(StorageError::from)?;
                    Ok(Arc::new(store) as Arc<dyn DurableStore>)
                }
            }));
            return;
        }
    }

    warn!("MONGO_URI not set; durable writes stay in process memory");
    let store = MemoryDurableStore::new();
    tokio::spawn(storage_supervisor::run(state.guard().clone(), move || {
        let store = store.clone();
        async move { Ok(Arc::new(store) as Arc<dyn DurableStore>) }
    }));
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

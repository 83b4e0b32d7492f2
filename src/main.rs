use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod cache;
mod clicks;
mod codegen;
mod config;
mod error;
mod handlers;
mod models;
mod service;
mod store;

use cache::LinkCache;
use clicks::ClickRecorder;
use codegen::RandomCodes;
use service::{CreatePolicy, LinkService};
use store::{memory::MemoryStore, sqlite::SqliteStore, BackendType, LinkStore};

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub service: LinkService,
    pub config: config::AppConfig,
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (ignore error if file is absent; env vars may already be set)
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snip=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::AppConfig::from_env()?;
    tracing::info!("Starting snip on {}:{}", config.host, config.port);
    tracing::info!("Base URL: {}", config.base_url);

    // A bad code policy is a startup error, never a per-request one.
    let generator = RandomCodes::new(&config.code_alphabet, config.code_length)
        .context("CODE_ALPHABET / CODE_LENGTH describe an unusable short code policy")?;

    let store: Arc<dyn LinkStore> = match config.store_backend {
        BackendType::Sqlite => Arc::new(SqliteStore::connect(&config.database_url).await?),
        BackendType::Memory => {
            tracing::warn!("Using the in-memory store; links are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    tracing::info!("Link store: {}", config.store_backend);

    let cache = LinkCache::new();
    cache::warm_cache(store.as_ref(), &cache).await?;

    let corpus = cache.len() as u64;
    tracing::info!(
        "Short codes: {} symbols x {} = {:.3e} codes; per-attempt collision chance {:.2e}",
        generator.alphabet_len(),
        generator.length(),
        generator.space(),
        generator.collision_probability(corpus),
    );
    if generator.exhaustion_probability(corpus, config.max_create_attempts) > 1e-6 {
        tracing::warn!(
            "{} links already issued; creations are likely to hit CodeSpaceExhausted, increase CODE_LENGTH",
            corpus
        );
    }

    let (clicks, click_worker) = ClickRecorder::spawn(store.clone(), config.click_queue_capacity);

    let service = LinkService::new(
        store,
        Arc::new(generator),
        cache,
        clicks,
        CreatePolicy {
            max_attempts: config.max_create_attempts,
            timeout: config.create_timeout,
        },
    );

    let bind_addr = format!("{}:{}", config.host, config.port);
    let app = build_router(Arc::new(AppState { service, config }));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and with it the last click recorder) is gone; wait for the
    // worker to flush what is still queued.
    click_worker.await?;
    tracing::info!("Click queue drained, bye");

    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route(
            "/links",
            post(handlers::api::create_link).get(handlers::api::list_links),
        )
        .route("/links/:code/analytics", get(handlers::api::analytics));

    Router::new()
        .route("/", get(handlers::redirect::index))
        .route("/health", get(|| async { axum::http::StatusCode::OK }))
        .nest("/api", api_router)
        // Short-link redirect; static routes above take priority
        .route("/:code", get(handlers::redirect::redirect))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

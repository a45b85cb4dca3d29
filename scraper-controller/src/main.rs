mod config;
mod controller;
mod error;

use std::sync::Arc;

use axum::{extract::State, routing::get, Router};
use config::Config;
use controller::{run_metrics_loop, run_reaper_loop, run_submission_handler};
use envconfig::Envconfig;
use eyre::Result;
use health::HealthRegistry;
use serve_metrics::setup_metrics_routes;
use store::{Client, RedisStoreClient};
use tracing::info;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    liveness: HealthRegistry,
}

fn app(liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(|| async { "scraper-controller" }))
        .route("/_readiness", get(|| async { "ok" }))
        .route(
            "/_liveness",
            get(|State(state): State<AppState>| async move { state.liveness.get_status() }),
        )
        .with_state(AppState { liveness })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("failed to load configuration from env");
    scraper_common::init_tracing(&config.logging_level, config.logging_pretty);

    let store: Arc<dyn Client> = Arc::new(
        RedisStoreClient::new(&config.redis_url)
            .await
            .expect("failed to connect to coordination store"),
    );

    let submissions = store
        .subscribe(&format!("{}jobs:submit", config.key_prefix))
        .await
        .expect("failed to subscribe to job submission channel");

    let liveness = HealthRegistry::new("liveness");

    let mut handles = Vec::new();

    let submission_store = store.clone();
    let submission_prefix = config.key_prefix.clone();
    handles.push(tokio::spawn(run_submission_handler(
        submission_store,
        submission_prefix,
        submissions,
    )));

    let reaper_store = store.clone();
    let reaper_prefix = config.key_prefix.clone();
    let reaper_interval = config.worker_timeout_secs;
    handles.push(tokio::spawn(run_reaper_loop(
        reaper_store,
        reaper_prefix,
        reaper_interval,
    )));

    let metrics_store = store.clone();
    let metrics_prefix = config.key_prefix.clone();
    let metrics_interval = config.metrics_update_interval_secs;
    handles.push(tokio::spawn(run_metrics_loop(
        metrics_store,
        metrics_prefix,
        metrics_interval,
    )));

    info!("scraper-controller started");

    let router = setup_metrics_routes(app(liveness));
    let http_server = tokio::spawn(listen(router, config.bind()));

    shutdown_signal().await;
    info!("shutdown signal received, stopping controller loops");

    for handle in handles {
        handle.abort();
    }
    http_server.abort();

    info!("exiting");
}

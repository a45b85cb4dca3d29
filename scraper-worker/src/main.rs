mod config;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use health::HealthRegistry;
use scraper_common::ProxyManager;
use serve_metrics::setup_metrics_routes;
use store::{Client, RedisStoreClient};
use tokio::sync::watch;
use tracing::{error, info};
use worker::{SharedServices, Worker};

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
        .route("/", get(|| async { "scraper-worker" }))
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

    let app_config = config.into_app_config();
    let bind = app_config.bind();

    let store: Arc<dyn Client> = Arc::new(
        RedisStoreClient::new(&app_config.redis_url)
            .await
            .expect("failed to connect to coordination store"),
    );

    let services = SharedServices::new(store.clone(), &app_config.key_prefix, app_config.governor);
    let proxies = Arc::new(ProxyManager::new(store.clone(), app_config.key_prefix.clone()));
    proxies.initialize(app_config.proxies.clone()).await;
    let user_agents = Arc::new(scraper_common::UserAgentRotator::new(
        app_config.user_agents.clone(),
    ));

    let liveness = HealthRegistry::new("liveness");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let hostname = hostname_or_default();
    let mut handles = Vec::new();
    for i in 0..app_config.worker_concurrency {
        let health = liveness
            .register(format!("worker-{i}"), Duration::from_secs(app_config.worker_timeout_secs))
            .await;
        let worker = Arc::new(Worker::new(
            &hostname,
            store.clone(),
            app_config.key_prefix.clone(),
            app_config.worker_timeout_secs,
            proxies.clone(),
            user_agents.clone(),
            services.governor.clone(),
            services.parsers.clone(),
            health,
        ));
        info!(worker_id = %worker.id, "starting worker loop");

        let run_worker = worker.clone();
        let run_rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { run_worker.run(run_rx).await }));

        let heartbeat_worker = worker.clone();
        let heartbeat_rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            heartbeat_worker.run_heartbeat(heartbeat_rx).await
        }));
    }

    let router = setup_metrics_routes(app(liveness));
    let http_server = tokio::spawn(listen(router, bind));

    shutdown_signal().await;
    info!("shutdown signal received, stopping worker loops");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(err) = handle.await {
            error!(error = %err, "worker task panicked during shutdown");
        }
    }
    http_server.abort();

    info!("exiting");
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string())
}

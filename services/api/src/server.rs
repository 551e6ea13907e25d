use crate::cli::ServeArgs;
use crate::infra::{seed_from_path, AppState};
use crate::routes::with_engine_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use stayflow::config::{AppConfig, EngineConfig, ServerConfig};
use stayflow::error::AppError;
use stayflow::lifecycle::{
    EntityStore, FileEntityStore, InMemoryEntityStore, StayEngine, SystemClock,
};
use stayflow::telemetry;
use tokio::sync::watch;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;
    info!(?config.environment, "configuration loaded");

    match config.engine.store_path.clone() {
        Some(path) => {
            let store = Arc::new(FileEntityStore::open(&path)?);
            info!(path = %path.display(), "using file-backed store");
            serve(store, &config.server, &config.engine, args).await
        }
        None => {
            serve(
                Arc::new(InMemoryEntityStore::new()),
                &config.server,
                &config.engine,
                args,
            )
            .await
        }
    }
}

async fn serve<S>(
    store: Arc<S>,
    server: &ServerConfig,
    engine_config: &EngineConfig,
    args: ServeArgs,
) -> Result<(), AppError>
where
    S: EntityStore + 'static,
{
    let engine = Arc::new(StayEngine::new(
        store,
        Arc::new(SystemClock),
        engine_config.settings(),
    )?);
    if let Some(path) = args.seed_csv.as_deref() {
        seed_from_path(&engine, path).await?;
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        tick_secs: engine_config.tick_every.as_secs(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = engine.spawn_scheduler(shutdown_rx);

    let app = with_engine_routes(Arc::clone(&engine))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        %addr,
        tick_secs = engine_config.tick_every.as_secs(),
        "stay lifecycle engine ready"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    readiness_flag.store(false, Ordering::Release);
    if shutdown_tx.send(true).is_err() {
        warn!("scheduler already stopped");
    }
    if let Err(err) = scheduler.await {
        warn!(error = %err, "scheduler task ended abnormally");
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

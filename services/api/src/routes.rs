use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use stayflow::lifecycle::{engine_router, EntityStore, StayEngine};

pub(crate) fn with_engine_routes<S>(engine: Arc<StayEngine<S>>) -> axum::Router
where
    S: EntityStore + 'static,
{
    engine_router(engine)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "stayflow",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// 200 once the listener is bound and the scheduler is running, 503 before and during shutdown.
pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    if !state.readiness.load(Ordering::Acquire) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "starting" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "scheduler_tick_secs": state.tick_secs,
        })),
    )
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let body = state.metrics.render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use stayflow::lifecycle::{EngineSettings, SystemClock};
    use tower::ServiceExt;

    fn app(ready: bool) -> axum::Router {
        let engine = StayEngine::in_memory(Arc::new(SystemClock), EngineSettings::default())
            .expect("engine starts");
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
            tick_secs: 60,
        };
        with_engine_routes(Arc::new(engine)).layer(Extension(state))
    }

    #[tokio::test]
    async fn readiness_reflects_the_flag() {
        let response = app(false)
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app(true)
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn engine_routes_sit_beside_the_probes() {
        let router = app(true);
        let response = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/api/v1/machines").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let tables: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(tables.as_array().map(Vec::len), Some(9));
    }
}

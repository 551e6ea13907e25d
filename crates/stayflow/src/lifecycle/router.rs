use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::access::AccessError;
use super::domain::{EntityId, EntityKind};
use super::engine::StayEngine;
use super::ledger::LedgerError;
use super::orchestrator::{Command, OrchestratorError};
use super::store::{EntityStore, StoreError};

/// Router builder exposing the engine's commands, reads, and unlock endpoint.
pub fn engine_router<S>(engine: Arc<StayEngine<S>>) -> Router
where
    S: EntityStore + 'static,
{
    Router::new()
        .route("/api/v1/commands", post(command_handler::<S>))
        .route("/api/v1/entities/:kind/:id", get(entity_handler::<S>))
        .route("/api/v1/keys/:key_id/unlock", post(unlock_handler::<S>))
        .route("/api/v1/bookings/:booking_id/totals", get(totals_handler::<S>))
        .route("/api/v1/rooms/:room_id/access-log", get(access_log_handler::<S>))
        .route("/api/v1/machines", get(machines_handler::<S>))
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnlockRequest {
    pub room_id: EntityId,
}

pub(crate) async fn command_handler<S>(
    State(engine): State<Arc<StayEngine<S>>>,
    axum::Json(command): axum::Json<Command>,
) -> Response
where
    S: EntityStore + 'static,
{
    let creates = command.action.creates();
    let name = command.name();
    match engine.submit(command).await {
        Ok(applied) => {
            let status = if creates {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            let payload = json!({
                "command": name,
                "entity": applied.target,
                "version": applied.target_version(),
                "events": applied.events,
            });
            (status, axum::Json(payload)).into_response()
        }
        Err(err) => orchestrator_error(err),
    }
}

pub(crate) async fn entity_handler<S>(
    State(engine): State<Arc<StayEngine<S>>>,
    Path((kind, id)): Path<(String, String)>,
) -> Response
where
    S: EntityStore + 'static,
{
    let Some(kind) = EntityKind::from_label(&kind) else {
        let payload = json!({
            "error": format!("unknown entity kind '{kind}'"),
        });
        return (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response();
    };
    let id = EntityId::new(id);
    match engine.entity(kind, &id) {
        Ok(Some(record)) => (StatusCode::OK, axum::Json(record)).into_response(),
        Ok(None) => {
            let payload = json!({
                "error": format!("{kind}/{id} not found"),
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(err) => store_error(err),
    }
}

pub(crate) async fn unlock_handler<S>(
    State(engine): State<Arc<StayEngine<S>>>,
    Path(key_id): Path<String>,
    axum::Json(request): axum::Json<UnlockRequest>,
) -> Response
where
    S: EntityStore + 'static,
{
    match engine.request_unlock(&EntityId::new(key_id), &request.room_id) {
        Ok(decision) if decision.is_granted() => {
            (StatusCode::OK, axum::Json(decision)).into_response()
        }
        Ok(decision) => (StatusCode::FORBIDDEN, axum::Json(decision)).into_response(),
        Err(AccessError::Store(err)) => store_error(err),
    }
}

pub(crate) async fn totals_handler<S>(
    State(engine): State<Arc<StayEngine<S>>>,
    Path(booking_id): Path<String>,
) -> Response
where
    S: EntityStore + 'static,
{
    match engine.totals(&EntityId::new(booking_id)) {
        Ok(totals) => (StatusCode::OK, axum::Json(totals)).into_response(),
        Err(err @ LedgerError::UnknownBooking(_)) => {
            let payload = json!({
                "error": err.to_string(),
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn access_log_handler<S>(
    State(engine): State<Arc<StayEngine<S>>>,
    Path(room_id): Path<String>,
) -> Response
where
    S: EntityStore + 'static,
{
    match engine.access_log(&EntityId::new(room_id)) {
        Ok(entries) => (StatusCode::OK, axum::Json(entries)).into_response(),
        Err(AccessError::Store(err)) => store_error(err),
    }
}

pub(crate) async fn machines_handler<S>(State(engine): State<Arc<StayEngine<S>>>) -> Response
where
    S: EntityStore + 'static,
{
    (StatusCode::OK, axum::Json(engine.machines())).into_response()
}

fn orchestrator_error(err: OrchestratorError) -> Response {
    let status = match &err {
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::ConcurrentModification { .. } => StatusCode::CONFLICT,
        OrchestratorError::InvalidTransition(_) | OrchestratorError::CapacityExceeded(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        OrchestratorError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut payload = json!({
        "error": err.to_string(),
        "code": err.code(),
    });
    match &err {
        OrchestratorError::CapacityExceeded(limit) => {
            payload["limit"] = json!(limit);
        }
        OrchestratorError::ConcurrentModification {
            entity,
            expected,
            actual,
        } => {
            payload["entity"] = json!(entity);
            payload["expected_version"] = json!(expected);
            payload["current_version"] = json!(actual);
        }
        _ => {}
    }
    (status, axum::Json(payload)).into_response()
}

fn store_error(err: StoreError) -> Response {
    let payload = json!({
        "error": err.to_string(),
    });
    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::lifecycle::engine::EngineSettings;
    use crate::lifecycle::scheduler::FixedClock;
    use crate::lifecycle::store::InMemoryEntityStore;

    fn engine() -> Arc<StayEngine<InMemoryEntityStore>> {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
                .single()
                .expect("valid timestamp"),
        ));
        Arc::new(StayEngine::in_memory(clock, EngineSettings::default()).expect("engine starts"))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn register_room() -> Value {
        json!({
            "kind": "register_room",
            "payload": {
                "room_number": "5",
                "name": "Loft",
                "kind": "suite",
                "capacity": 2
            },
            "entity_id": "room-5"
        })
    }

    #[tokio::test]
    async fn creation_commands_answer_created_and_reads_follow() {
        let engine = engine();
        let router = engine_router(Arc::clone(&engine));

        let response = router
            .clone()
            .oneshot(post_json("/api/v1/commands", register_room()))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["command"], "register_room");
        assert_eq!(body["version"], 1);

        let response = router
            .oneshot(
                Request::get("/api/v1/entities/room/room-5")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["entity"]["entity"], "room");
        assert_eq!(body["entity"]["condition"], "ready");
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let engine = engine();
        let router = engine_router(Arc::clone(&engine));
        router
            .clone()
            .oneshot(post_json("/api/v1/commands", register_room()))
            .await
            .expect("router responds");

        let stale = json!({
            "kind": "start_cleaning",
            "entity_id": "task-404",
            "expected_version": 1
        });
        let response = router
            .clone()
            .oneshot(post_json("/api/v1/commands", stale))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let backwards = json!({
            "kind": "create_booking",
            "payload": {
                "guest_id": "guest-1",
                "room_id": "room-5",
                "check_in": "2025-03-12T15:00:00Z",
                "check_out": "2025-03-10T10:00:00Z",
                "nightly_rate": 10000
            }
        });
        let response = router
            .clone()
            .oneshot(post_json("/api/v1/commands", backwards))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "invalid_command");

        let response = router
            .clone()
            .oneshot(
                Request::get("/api/v1/entities/spaceship/x")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(
                Request::get("/api/v1/bookings/booking-404/totals")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn double_booking_reports_the_clashing_stay() {
        let engine = engine();
        let router = engine_router(Arc::clone(&engine));
        router
            .clone()
            .oneshot(post_json("/api/v1/commands", register_room()))
            .await
            .expect("router responds");

        let stay = |guest: &str, booking: &str| {
            json!({
                "kind": "create_booking",
                "entity_id": booking,
                "payload": {
                    "guest_id": guest,
                    "room_id": "room-5",
                    "check_in": "2025-03-10T15:00:00Z",
                    "check_out": "2025-03-13T10:00:00Z",
                    "nightly_rate": 10000
                }
            })
        };
        let response = router
            .clone()
            .oneshot(post_json("/api/v1/commands", stay("guest-1", "booking-1")))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .oneshot(post_json("/api/v1/commands", stay("guest-2", "booking-2")))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["code"], "capacity_exceeded");
        assert_eq!(body["limit"]["rule"], "room_booked");
        assert_eq!(body["limit"]["room_id"], "room-5");
        assert_eq!(body["limit"]["booking_id"], "booking-1");
    }

    #[tokio::test]
    async fn denied_unlock_is_forbidden_and_logged() {
        let engine = engine();
        let router = engine_router(Arc::clone(&engine));

        let response = router
            .clone()
            .oneshot(post_json(
                "/api/v1/keys/key-404/unlock",
                json!({ "room_id": "room-5" }),
            ))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["outcome"], "denied");
        assert_eq!(body["reason"]["code"], "unknown_key");

        let response = router
            .oneshot(
                Request::get("/api/v1/rooms/room-5/access-log")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");
        let body = json_body(response).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn machines_lists_every_table() {
        let router = engine_router(engine());
        let response = router
            .oneshot(
                Request::get("/api/v1/machines")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let tables = body.as_array().expect("array of tables");
        assert_eq!(tables.len(), 9);
        assert_eq!(tables[0]["machine"], "booking");
    }
}

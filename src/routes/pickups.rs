use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::PickupError,
    models::{
        auth::AuthenticatedUser,
        request::{CreatePickupRequest, PickupKind, PickupStatusResponse},
    },
    services::{pickups::PickupService, roster::RosterService},
    AppState,
};

fn internal(e: anyhow::Error) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

/// Map the lifecycle taxonomy onto HTTP. The 409s are informational
/// concurrent-use answers, not failures; nothing here invites an
/// automatic retry.
fn pickup_error(err: PickupError) -> (StatusCode, Json<Value>) {
    let (status, message) = match &err {
        PickupError::MissingTeacher => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "No teacher is assigned to this class or group. Contact the administration.",
        ),
        PickupError::AlreadyRequested => (
            StatusCode::CONFLICT,
            "A pickup request for this child is already pending.",
        ),
        PickupError::InGraceWindow { .. } => (
            StatusCode::CONFLICT,
            "This child was approved for pickup recently. Try again later.",
        ),
        PickupError::Creation(_) | PickupError::Subscription(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Could not send the pickup request. Please try again.",
        ),
    };

    let mut body = json!({ "error": err.code(), "message": message });
    if let PickupError::InGraceWindow { remaining } = &err {
        body["retry_after_seconds"] = json!(remaining.as_secs());
    }
    (status, Json(body))
}

pub async fn create_pickup(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(body): Json<CreatePickupRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let store = state.store.as_ref();

    let scope = match body.kind {
        PickupKind::School => RosterService::school_scope(store, body.scope_id).await,
        PickupKind::Kindergarten => RosterService::kindergarten_scope(store, body.scope_id).await,
    }
    .map_err(internal)?
    .ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "scope_not_found" })),
    ))?;

    let subject = match body.kind {
        PickupKind::School => {
            RosterService::student_subject(store, body.subject_id, body.scope_id).await
        }
        PickupKind::Kindergarten => {
            RosterService::child_subject(store, body.subject_id, body.scope_id).await
        }
    }
    .map_err(internal)?
    .ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "subject_not_found" })),
    ))?;

    let request_id = state
        .lifecycle
        .request_pickup(&subject, &scope)
        .await
        .map_err(pickup_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "request_id": request_id })),
    ))
}

pub async fn get_pickup(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let found = PickupService::get(state.store.as_ref(), request_id)
        .await
        .map_err(internal)?;

    match found {
        Some((doc, request)) => {
            let response = PickupStatusResponse {
                request_id: doc.id,
                status: request.status,
                subject_name: request.subject_name,
                kind: request.kind,
                created_at: doc.created_at,
            };
            Ok(Json(serde_json::to_value(response).unwrap()))
        }
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "not_found" })),
        )),
    }
}

/// Snapshot of the per-scope pending map; the websocket variant keeps
/// it live. Roster screens use this to disable buttons for subjects
/// with an outstanding request.
pub async fn scope_pending(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(scope_id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    PickupService::pending_for_scope(state.store.as_ref(), scope_id)
        .await
        .map(|map| Json(serde_json::to_value(map).unwrap()))
        .map_err(internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        models::auth::UserRole,
        services::lifecycle::PickupLifecycle,
        store::{collections, memory::MemoryStore, DocumentStore},
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn test_state() -> AppState {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let lifecycle = PickupLifecycle::new(Arc::clone(&store), Duration::from_secs(600));
        let config = Arc::new(Config {
            database_url: String::new(),
            redis_url: String::new(),
            jwt_secret: "test-secret".to_string(),
            host: String::new(),
            port: 0,
            app_base_url: String::new(),
            grace_window: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        });
        AppState {
            store,
            lifecycle,
            config,
        }
    }

    fn parent() -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: UserRole::Parent,
        }
    }

    /// One class with one student; returns (scope_id, subject_id).
    async fn seed_class(state: &AppState, teacher_id: Option<Uuid>) -> (Uuid, Uuid) {
        let class = state
            .store
            .create(
                collections::CLASSES,
                json!({ "name": "B", "number": 5, "teacher_id": teacher_id }),
            )
            .await
            .unwrap();
        let student = state
            .store
            .create(
                collections::STUDENTS,
                json!({ "name": "Timur Nazarov", "class_id": class.id }),
            )
            .await
            .unwrap();
        (class.id, student.id)
    }

    async fn submit(
        state: &AppState,
        scope_id: Uuid,
        subject_id: Uuid,
    ) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
        create_pickup(
            State(state.clone()),
            parent(),
            Json(CreatePickupRequest {
                subject_id,
                scope_id,
                kind: PickupKind::School,
            }),
        )
        .await
    }

    #[tokio::test]
    async fn missing_teacher_maps_to_422_with_stable_code() {
        let state = test_state();
        let (scope_id, subject_id) = seed_class(&state, None).await;

        let (status, Json(body)) = submit(&state, scope_id, subject_id).await.unwrap_err();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "missing_teacher");
        assert!(body["message"].as_str().unwrap().contains("administration"));
    }

    #[tokio::test]
    async fn repeat_request_maps_to_409_already_requested() {
        let state = test_state();
        let (scope_id, subject_id) = seed_class(&state, Some(Uuid::new_v4())).await;

        let (status, Json(body)) = submit(&state, scope_id, subject_id).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["request_id"].is_string());

        let (status, Json(body)) = submit(&state, scope_id, subject_id).await.unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_requested");
        assert!(body.get("retry_after_seconds").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn grace_window_maps_to_409_with_retry_after() {
        let state = test_state();
        let (scope_id, subject_id) = seed_class(&state, Some(Uuid::new_v4())).await;
        let mut notices = state.lifecycle.subscribe_notices();

        let (_, Json(body)) = submit(&state, scope_id, subject_id).await.unwrap();
        let request_id: Uuid = body["request_id"].as_str().unwrap().parse().unwrap();

        state
            .store
            .merge(
                collections::PICKUP_REQUESTS,
                request_id,
                json!({ "status": "approved" }),
            )
            .await
            .unwrap();
        notices.recv().await.unwrap();

        let (status, Json(body)) = submit(&state, scope_id, subject_id).await.unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "grace_window");
        assert_eq!(body["retry_after_seconds"], 600);
    }

    #[tokio::test]
    async fn unknown_subject_maps_to_404() {
        let state = test_state();
        let (scope_id, _) = seed_class(&state, Some(Uuid::new_v4())).await;

        let (status, Json(body)) = submit(&state, scope_id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "subject_not_found");
    }
}

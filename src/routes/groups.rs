use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    models::auth::AuthenticatedUser,
    services::roster::RosterService,
    AppState,
};

pub async fn list_groups(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    RosterService::groups(state.store.as_ref())
        .await
        .map(|groups| Json(serde_json::to_value(groups).unwrap()))
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })
}

pub async fn list_children(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = RosterService::kindergarten_scope(state.store.as_ref(), group_id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?;
    if scope.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "group_not_found" })),
        ));
    }

    RosterService::children_in_group(state.store.as_ref(), group_id)
        .await
        .map(|children| Json(serde_json::to_value(children).unwrap()))
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })
}

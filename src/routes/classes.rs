use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    models::auth::AuthenticatedUser,
    services::roster::RosterService,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct GradeQuery {
    pub grade: i32,
}

pub async fn list_classes(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<GradeQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    RosterService::classes_by_grade(state.store.as_ref(), query.grade)
        .await
        .map(|classes| Json(serde_json::to_value(classes).unwrap()))
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })
}

pub async fn list_students(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(class_id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let scope = RosterService::school_scope(state.store.as_ref(), class_id)
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
            Json(json!({ "error": "class_not_found" })),
        ));
    }

    RosterService::students_in_class(state.store.as_ref(), class_id)
        .await
        .map(|students| Json(serde_json::to_value(students).unwrap()))
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })
}

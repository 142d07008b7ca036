use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    models::auth::AuthenticatedUser,
    services::roster::RosterService,
    AppState,
};

/// The token comes from the auth collaborator; the user document in the
/// store is still the source of truth. A valid token without a user
/// document is treated as signed out.
pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let stored = RosterService::user(state.store.as_ref(), user.user_id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?;

    match stored {
        Some(stored) => Ok(Json(json!({ "id": user.user_id, "role": stored.role }))),
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unknown_user" })),
        )),
    }
}

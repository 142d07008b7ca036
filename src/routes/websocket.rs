//! Live feeds over WebSocket: single-request status, per-scope pending
//! map, and the terminal-status notice stream. Browsers cannot set an
//! Authorization header on a WebSocket, so the token rides in the query
//! string.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{middleware::auth::decode_access_token, services::pickups::PickupService, AppState};
use crate::services::pickups::RequestUpdate;

#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    pub token: String,
}

/// GET /pickups/{id}/ws — the status screen feed: current status first,
/// then one frame per observed change until the client disconnects.
pub async fn pickup_status_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Query(params): Query<WsQueryParams>,
) -> Response {
    let auth = decode_access_token(&params.token, &state.config.jwt_secret);

    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok(user) => {
                info!("Status watch connected: user={} request={}", user.user_id, request_id);
                stream_request_status(socket, state, request_id).await;
            }
            Err(e) => {
                error!("WebSocket auth failed: {}", e);
            }
        }
    })
}

async fn stream_request_status(socket: WebSocket, state: AppState, request_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    let mut watch = match PickupService::watch_request(state.store.as_ref(), request_id).await {
        Ok(watch) => watch,
        Err(e) => {
            error!("Could not watch request {}: {}", request_id, e);
            return;
        }
    };

    let mut feed_task = tokio::spawn(async move {
        while let Some(update) = watch.next().await {
            let frame = match update {
                RequestUpdate::Status {
                    status,
                    subject_name,
                } => json!({
                    "type": "status",
                    "status": status,
                    "subject_name": subject_name,
                }),
                RequestUpdate::NotFound => json!({ "type": "not_found" }),
            };
            if sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut client_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side ends first tears the other one down, so the store
    // subscription is cancelled on disconnect.
    tokio::select! {
        _ = (&mut feed_task) => client_task.abort(),
        _ = (&mut client_task) => feed_task.abort(),
    }

    info!("Status watch disconnected: request={}", request_id);
}

/// GET /scopes/{id}/pending/ws — live pending map for a roster screen.
pub async fn scope_pending_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(scope_id): Path<Uuid>,
    Query(params): Query<WsQueryParams>,
) -> Response {
    let auth = decode_access_token(&params.token, &state.config.jwt_secret);

    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok(user) => {
                info!("Pending watch connected: user={} scope={}", user.user_id, scope_id);
                stream_scope_pending(socket, state, scope_id).await;
            }
            Err(e) => {
                error!("WebSocket auth failed: {}", e);
            }
        }
    })
}

async fn stream_scope_pending(socket: WebSocket, state: AppState, scope_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    let mut watch = match PickupService::watch_pending_for_scope(state.store.as_ref(), scope_id).await
    {
        Ok(watch) => watch,
        Err(e) => {
            error!("Could not watch scope {}: {}", scope_id, e);
            return;
        }
    };

    let mut feed_task = tokio::spawn(async move {
        while let Some(map) = watch.next().await {
            let frame = json!({ "type": "pending", "subjects": map });
            if sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut client_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut feed_task) => client_task.abort(),
        _ = (&mut client_task) => feed_task.abort(),
    }
}

/// GET /ws — terminal-status notices (the toast feed).
pub async fn notices_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
) -> Response {
    let auth = decode_access_token(&params.token, &state.config.jwt_secret);

    ws.on_upgrade(move |socket| async move {
        match auth {
            Ok(user) => {
                info!("Notice stream connected: user={}", user.user_id);
                stream_notices(socket, state).await;
            }
            Err(e) => {
                error!("WebSocket auth failed: {}", e);
            }
        }
    })
}

async fn stream_notices(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut notices = state.lifecycle.subscribe_notices();

    let mut feed_task = tokio::spawn(async move {
        loop {
            let notice = match notices.recv().await {
                Ok(notice) => notice,
                // Missed notices are stale toasts; skip ahead.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let frame = json!({ "type": "notice", "notice": notice });
            if sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut client_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut feed_task) => client_task.abort(),
        _ = (&mut client_task) => feed_task.abort(),
    }

    info!("Notice stream disconnected");
}

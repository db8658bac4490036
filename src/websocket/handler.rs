use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::server::AppState;

use super::lifecycle::{run_connection, ConnectionContext};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Missing or empty means anonymous
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(anonymous = query.user_id.as_deref().map_or(true, str::is_empty))
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response> {
    let user_id = validate_user_id(
        query.user_id.unwrap_or_default(),
        state.settings.websocket.max_user_id_len,
    )?;

    tracing::info!(user_id = %user_id, "WebSocket upgrade requested");

    let ctx = state.connection_context();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, ctx, user_id)))
}

/// User ids are opaque, but bounded in length and free of control characters
pub fn validate_user_id(user_id: String, max_len: usize) -> Result<String> {
    if user_id.chars().count() > max_len {
        return Err(AppError::bad_request(format!(
            "userId must be at most {} characters",
            max_len
        )));
    }
    if user_id.chars().any(char::is_control) {
        return Err(AppError::bad_request("userId contains control characters"));
    }
    Ok(user_id)
}

async fn handle_socket(socket: WebSocket, ctx: ConnectionContext, user_id: String) {
    let (sink, stream) = socket.split();
    run_connection(ctx, user_id, sink, stream).await;
}

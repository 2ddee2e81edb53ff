use axum::{
    extract::{State, ws::WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::AppState;
use crate::connection::limit_upgrade;
use crate::error::UpgradeError;
use crate::session::run_session;

/// `GET /ws`: claim the single session slot, then upgrade.
///
/// The slot is claimed before the handshake so a concurrent second tab is
/// turned away with `409 Conflict`. If the handshake itself fails the
/// reservation is dropped with the callback and the slot is free again.
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let reservation = match state.sessions.try_reserve() {
        Ok(reservation) => reservation,
        Err(e) => {
            warn!(code = e.error_code(), "rejecting websocket upgrade: {}", e);
            return (StatusCode::CONFLICT, e.to_string()).into_response();
        }
    };

    info!("websocket upgrade accepted");
    limit_upgrade(ws, state.config.liveness.max_frame_bytes)
        .on_failed_upgrade(|e| {
            let e = UpgradeError::from(e);
            warn!(code = e.error_code(), "{}", e);
        })
        .on_upgrade(move |socket| async move {
            run_session(reservation, socket, state).await;
        })
}

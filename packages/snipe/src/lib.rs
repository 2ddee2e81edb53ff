// Library interface for snipe
// Relays operator-typed lines from stdin to a single browser tab over a WebSocket

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod line_source;
pub mod liveness;
pub mod page;
pub mod relay;
pub mod session;
pub mod websocket;

#[cfg(test)]
mod test_helpers;

pub use config::SnipeConfig;
pub use error::{BindError, RecvError, SendError, UpgradeError};
pub use line_source::LineReader;
pub use session::{SessionEnded, SessionRegistry};

use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    /// Operator input, taken by the one session that starts.
    pub line_source: Arc<Mutex<Option<LineReader>>>,
    pub config: Arc<SnipeConfig>,
}

impl AppState {
    pub fn new(config: SnipeConfig, line_source: LineReader) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            line_source: Arc::new(Mutex::new(Some(line_source))),
            config: Arc::new(config),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(page::home_page))
        .route("/ws", get(websocket::websocket_handler))
        .fallback(page::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, BindError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| BindError { addr, source })
}

/// Serve until the session ends, then drain in-flight requests and return.
///
/// Returns the end event, or `None` if the server stopped some other way.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<Option<SessionEnded>> {
    let sessions = state.sessions.clone();
    let app = create_router(state);

    if let Ok(addr) = listener.local_addr() {
        info!("listening on http://{}", addr);
    }

    let shutdown = {
        let sessions = sessions.clone();
        async move {
            let ended = sessions.wait_ended().await;
            info!(session_id = %ended.session_id, "session over, shutting down");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(sessions.ended())
}

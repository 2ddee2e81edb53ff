use axum::{Router, extract::ws::WebSocketUpgrade, routing::get};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};

use crate::connection::{ConnectionHandle, limit_upgrade};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Timeout for each async operation in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve `router` on a random loopback port.
pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let (client, _) = tokio::time::timeout(
        TEST_TIMEOUT,
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws")),
    )
    .await
    .expect("connect timed out")
    .expect("websocket handshake");
    client
}

/// Upgrade one real WebSocket, capped like the `/ws` route, and hand back
/// both ends.
pub async fn connect_pair(max_frame_bytes: usize) -> (Arc<ConnectionHandle>, WsClient) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let router = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let tx = tx.clone();
            async move {
                limit_upgrade(ws, max_frame_bytes).on_upgrade(move |socket| async move {
                    let _ = tx.send(ConnectionHandle::new(socket, max_frame_bytes));
                })
            }
        }),
    );
    let addr = spawn_router(router).await;
    let client = connect(addr).await;
    let handle = tokio::time::timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("upgrade timed out")
        .expect("handle");
    (handle, client)
}

/// Next text payload from the server, skipping control frames.
/// `None` once the server closes.
pub async fn recv_text(client: &mut WsClient) -> Option<String> {
    loop {
        let next = tokio::time::timeout(TEST_TIMEOUT, client.next())
            .await
            .expect("recv timed out");
        match next {
            Some(Ok(tungstenite::Message::Text(text))) => return Some(text.to_string()),
            Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

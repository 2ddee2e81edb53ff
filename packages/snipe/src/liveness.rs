//! Dead-peer detection.
//!
//! The monitor owns the read side of the connection. Inbound frames carry no
//! meaning here and are drained only so that acknowledgements get processed
//! and closure is noticed. Any read error is final: the handle is closed and
//! the error is returned for the session to report.

use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::connection::{ConnectionHandle, Frame};
use crate::error::RecvError;

/// Drain inbound frames until the connection is lost.
pub async fn monitor(conn: &ConnectionHandle, window: Duration) -> RecvError {
    conn.set_read_deadline(Some(Instant::now() + window));
    conn.set_liveness_ack_handler(move |deadline| deadline.extend(window))
        .await;

    loop {
        match conn.receive_next().await {
            Ok(Frame::Ack) => trace!("liveness acknowledged"),
            Ok(Frame::Probe) => trace!("peer probe"),
            Ok(Frame::Text(text)) => debug!(bytes = text.len(), "discarding inbound text"),
            Ok(Frame::Binary(data)) => debug!(bytes = data.len(), "discarding inbound binary"),
            Err(e) => {
                conn.close().await;
                return e;
            }
        }
    }
}

/// Send a probe every `interval` until one fails.
pub async fn probe(conn: &ConnectionHandle, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = conn.ping().await {
            debug!("stopping probes: {}", e);
            return;
        }
    }
}

use std::io;
use tracing::{Level, debug, info, warn};

use crate::command::Command;
use crate::connection::ConnectionHandle;
use crate::error::SendError;
use crate::line_source::{LineReader, ReadOutcome};

/// Why the relay loop stopped.
#[derive(Debug)]
pub enum RelayExit {
    SendFailed(SendError),
    InputClosed,
    InputFailed(io::Error),
}

impl RelayExit {
    pub fn reason_code(&self) -> &str {
        match self {
            Self::SendFailed(e) => e.error_code(),
            Self::InputClosed => "input_closed",
            Self::InputFailed(_) => "input_failed",
        }
    }
}

/// Forward operator lines to the peer, one text frame per line, until a
/// send fails or the input ends. Never retries and never ends the session
/// itself.
pub async fn run_relay(conn: &ConnectionHandle, source: &mut LineReader) -> RelayExit {
    let mut relayed = 0usize;
    loop {
        source.prompt();
        let line = match source.next_line().await {
            ReadOutcome::Line(line) => line,
            ReadOutcome::Empty => continue,
            ReadOutcome::Closed => {
                info!(relayed, "operator input closed");
                return RelayExit::InputClosed;
            }
            ReadOutcome::Fatal(e) => {
                warn!(relayed, "operator input failed: {}", e);
                return RelayExit::InputFailed(e);
            }
        };

        if tracing::enabled!(Level::DEBUG)
            && let Some(command) = Command::parse(&line)
        {
            debug!(command = command.token(), "relaying command");
        }

        if let Err(e) = conn.send(&line).await {
            warn!(relayed, code = e.error_code(), "relay stopped: {}", e);
            return RelayExit::SendFailed(e);
        }
        relayed += 1;
    }
}

//! Session lifecycle.
//!
//! The process serves one browser tab. [`SessionRegistry`] holds that single
//! slot and walks it through `Idle → Reserved → Active → Ended`; `Ended` is
//! terminal. The host watches for [`SessionEnded`] and shuts down.

use axum::extract::ws::WebSocket;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, info, info_span, warn};

use crate::AppState;
use crate::connection::ConnectionHandle;
use crate::error::{RecvError, UpgradeError};
use crate::{liveness, relay};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    pub session_id: String,
    pub reason: RecvError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// An upgrade is in progress.
    Reserved,
    Active { session_id: String },
    Ended(SessionEnded),
}

/// Capacity-one session slot.
pub struct SessionRegistry {
    phase: watch::Sender<SessionPhase>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: watch::Sender::new(SessionPhase::Idle),
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    /// Claim the slot for an upgrade. Fails unless the slot has never been used.
    pub fn try_reserve(self: &Arc<Self>) -> Result<Reservation, UpgradeError> {
        let reserved = self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Idle {
                *phase = SessionPhase::Reserved;
                true
            } else {
                false
            }
        });
        if reserved {
            Ok(Reservation {
                registry: self.clone(),
                activated: false,
            })
        } else {
            Err(UpgradeError::SessionUnavailable)
        }
    }

    /// The end event, once the session is over.
    pub fn ended(&self) -> Option<SessionEnded> {
        match &*self.phase.borrow() {
            SessionPhase::Ended(ended) => Some(ended.clone()),
            _ => None,
        }
    }

    /// Wait for the session to end.
    pub async fn wait_ended(&self) -> SessionEnded {
        let mut rx = self.phase.subscribe();
        loop {
            let ended = match &*rx.borrow_and_update() {
                SessionPhase::Ended(ended) => Some(ended.clone()),
                _ => None,
            };
            if let Some(ended) = ended {
                return ended;
            }
            // The sender lives in `self`, so this only fails if `self` is gone.
            if rx.changed().await.is_err() {
                return SessionEnded {
                    session_id: String::new(),
                    reason: RecvError::closed("registry dropped"),
                };
            }
        }
    }

    fn release(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Reserved {
                *phase = SessionPhase::Idle;
                true
            } else {
                false
            }
        });
    }

    fn end(&self, ended: SessionEnded) {
        self.phase.send_if_modified(|phase| {
            if matches!(phase, SessionPhase::Ended(_)) {
                return false;
            }
            *phase = SessionPhase::Ended(ended);
            true
        });
    }
}

/// A claimed slot. Dropping it before [`Reservation::activate`] hands the
/// slot back, so a failed handshake does not use up the session.
pub struct Reservation {
    registry: Arc<SessionRegistry>,
    activated: bool,
}

impl Reservation {
    pub fn activate(mut self, session_id: impl Into<String>) -> ActiveSession {
        let session_id = session_id.into();
        self.activated = true;
        self.registry.phase.send_replace(SessionPhase::Active {
            session_id: session_id.clone(),
        });
        ActiveSession {
            registry: self.registry.clone(),
            session_id,
            ended: false,
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.activated {
            self.registry.release();
        }
    }
}

/// The live session. Ending is irreversible; dropping without ending still
/// ends it.
pub struct ActiveSession {
    registry: Arc<SessionRegistry>,
    session_id: String,
    ended: bool,
}

impl ActiveSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn end(mut self, reason: RecvError) -> SessionEnded {
        self.ended = true;
        let ended = SessionEnded {
            session_id: self.session_id.clone(),
            reason,
        };
        self.registry.end(ended.clone());
        ended
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if !self.ended {
            self.registry.end(SessionEnded {
                session_id: self.session_id.clone(),
                reason: RecvError::closed("session dropped"),
            });
        }
    }
}

/// Drive one upgraded connection: the liveness monitor runs here, the relay
/// loop and the prober run as their own tasks against the same handle.
/// Returns once the monitor reports the connection lost.
pub async fn run_session(reservation: Reservation, socket: WebSocket, state: AppState) -> SessionEnded {
    let session_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("session", session_id = %session_id);
    let session = reservation.activate(session_id);

    async move {
        let liveness = state.config.liveness.clone();
        let relay_config = state.config.relay.clone();
        let conn = ConnectionHandle::new(socket, liveness.max_frame_bytes);
        info!("session started");

        let relay_task = match state.line_source.lock().await.take() {
            Some(mut source) => {
                let conn = conn.clone();
                Some(tokio::spawn(
                    async move {
                        let exit = relay::run_relay(&conn, &mut source).await;
                        info!(reason = exit.reason_code(), "relay stopped");
                        if relay_config.close_on_failure {
                            conn.close().await;
                        }
                    }
                    .in_current_span(),
                ))
            }
            None => {
                warn!("no operator input available, relay not started");
                None
            }
        };

        let probe_task = liveness.ping_interval.map(|interval| {
            let conn = conn.clone();
            tokio::spawn(async move { liveness::probe(&conn, interval).await }.in_current_span())
        });

        let reason = liveness::monitor(&conn, liveness.window).await;

        for task in [relay_task, probe_task].into_iter().flatten() {
            task.abort();
        }

        info!(reason = reason.error_code(), "session ended: {}", reason);
        session.end(reason)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_drop_releases() {
        let registry = SessionRegistry::new();
        let reservation = registry.try_reserve().unwrap();
        assert_eq!(registry.phase(), SessionPhase::Reserved);
        assert!(matches!(
            registry.try_reserve(),
            Err(UpgradeError::SessionUnavailable)
        ));

        drop(reservation);
        assert_eq!(registry.phase(), SessionPhase::Idle);
        assert!(registry.try_reserve().is_ok());
    }

    #[test]
    fn active_session_blocks_new_reservations() {
        let registry = SessionRegistry::new();
        let session = registry.try_reserve().unwrap().activate("s1");
        assert_eq!(
            registry.phase(),
            SessionPhase::Active {
                session_id: "s1".into()
            }
        );
        assert!(registry.try_reserve().is_err());
        assert_eq!(session.session_id(), "s1");
    }

    #[test]
    fn ended_is_terminal() {
        let registry = SessionRegistry::new();
        let session = registry.try_reserve().unwrap().activate("s1");
        let ended = session.end(RecvError::Timeout);

        assert_eq!(ended.reason, RecvError::Timeout);
        assert_eq!(registry.ended(), Some(ended));
        assert!(registry.try_reserve().is_err());
    }

    #[test]
    fn dropping_active_session_ends_it() {
        let registry = SessionRegistry::new();
        drop(registry.try_reserve().unwrap().activate("s1"));
        let ended = registry.ended().expect("ended");
        assert_eq!(ended.session_id, "s1");
        assert!(matches!(ended.reason, RecvError::Closed { .. }));
    }

    #[tokio::test]
    async fn wait_ended_resolves_on_end() {
        let registry = SessionRegistry::new();
        let session = registry.try_reserve().unwrap().activate("s1");

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_ended().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        session.end(RecvError::closed("bye"));
        let ended = waiter.await.unwrap();
        assert_eq!(ended.session_id, "s1");
        assert_eq!(ended.reason, RecvError::closed("bye"));
    }

    #[tokio::test]
    async fn wait_ended_returns_immediately_when_already_ended() {
        let registry = SessionRegistry::new();
        registry
            .try_reserve()
            .unwrap()
            .activate("s1")
            .end(RecvError::Timeout);
        assert_eq!(registry.wait_ended().await.reason, RecvError::Timeout);
    }
}

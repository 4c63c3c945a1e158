//! Reconnection supervision
//!
//! Watches session state and arms a manual reconnect whenever the session
//! lands in a terminal state. Reconnecting is never automatic: the
//! embedding layer decides when to call [`ReconnectionSupervisor::reconnect`],
//! typically behind a user action, so a flapping host cannot trap the
//! client in a reconnect storm.
//!
//! Every reconnect carries a fresh nonce in the HELLO metadata so the host
//! can tell a returning client apart from a stale duplicate registration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::session::PeerSession;

pub struct ReconnectionSupervisor {
    session: Arc<PeerSession>,
    armed: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

impl ReconnectionSupervisor {
    /// Start watching the session's state channel.
    pub fn new(session: Arc<PeerSession>) -> Self {
        let armed = Arc::new(AtomicBool::new(false));

        let watcher = {
            let session = Arc::clone(&session);
            let armed = Arc::clone(&armed);
            tokio::spawn(async move {
                let mut state_rx = session.subscribe_state();
                loop {
                    if state_rx.changed().await.is_err() {
                        return;
                    }
                    let state = *state_rx.borrow();
                    if state.is_terminal() {
                        if !armed.swap(true, Ordering::AcqRel) {
                            info!("session ended in state {state}, reconnect armed");
                            session
                                .events()
                                .status("connection ended, reconnect available");
                        }
                    } else {
                        armed.store(false, Ordering::Release);
                    }
                }
            })
        };

        Self {
            session,
            armed,
            watcher,
        }
    }

    /// Whether the session has ended and a reconnect would do something
    pub fn can_reconnect(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Reconnect with a fresh session nonce.
    pub async fn reconnect(&self) -> Result<()> {
        let nonce = Uuid::new_v4().to_string();
        debug!(%nonce, "reconnecting with fresh nonce");
        self.session
            .set_session_meta(Some(serde_json::json!({ "nonce": nonce })));
        self.armed.store(false, Ordering::Release);
        self.session.reset().await
    }
}

impl Drop for ReconnectionSupervisor {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

//! Cross-tab synchronization.
//!
//! Every tab runs one `CrossTabSync`, the only subscriber that turns storage
//! change notifications into session transitions.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace};

use super::session::Session;
use super::store::StorageEvent;

pub struct CrossTabSync {
    session: Session,
    events: broadcast::Receiver<StorageEvent>,
}

impl CrossTabSync {
    /// Subscribe now so that writes made before `run` is polled are not missed.
    pub fn new(session: Session) -> Self {
        let events = session.bridge().subscribe();
        Self { session, events }
    }

    /// Run until the storage channel closes or the task is aborted.
    pub async fn run(mut self) {
        let key = self.session.bridge().key().to_string();
        let own_tab = self.session.bridge().tab();
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if event.key != key || event.writer == own_tab {
                        trace!(key = %event.key, "Ignoring storage event");
                        continue;
                    }
                    self.session.observe_external().await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Storage events lagged, reconciling");
                    self.session.observe_external().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

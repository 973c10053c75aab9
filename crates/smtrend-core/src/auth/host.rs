//! Wires one tab's session to its background tasks.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::api::AuthApi;
use crate::config::SessionSettings;

use super::activity::{ActivityBus, ActivityMonitor};
use super::clock::Clock;
use super::session::Session;
use super::store::PersistenceBridge;
use super::sync::CrossTabSync;

/// A started session: restored from storage, with the periodic expiry check,
/// activity monitor and cross-tab synchronizer running.
///
/// Dropping the host stops the tasks and cancels the logout timer.
pub struct SessionHost {
    session: Session,
    activity: ActivityBus,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHost {
    pub async fn start(
        settings: SessionSettings,
        api: Arc<dyn AuthApi>,
        bridge: PersistenceBridge,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = Session::new(api, bridge, clock, settings);
        let activity = ActivityBus::new();

        // Subscribe before restoring so a concurrent write by another tab is seen.
        let sync = CrossTabSync::new(session.clone());
        session.restore().await;

        let tasks = vec![
            tokio::spawn(poll_expiry(session.clone())),
            tokio::spawn(ActivityMonitor::new(session.clone(), activity.clone()).run()),
            tokio::spawn(sync.run()),
        ];
        info!(
            authenticated = session.snapshot().is_authenticated(),
            "Session started"
        );

        Self {
            session,
            activity,
            tasks,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Bus the UI records pointer, click and key activity on.
    pub fn activity(&self) -> &ActivityBus {
        &self.activity
    }

    /// Stop the background tasks. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        debug!("Stopping session tasks");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.session.teardown();
    }
}

impl Drop for SessionHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll_expiry(session: Session) {
    let mut interval = time::interval(session.settings().poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_stored = session.bridge().load();
    loop {
        interval.tick().await;

        // Other processes sharing the storage file raise no change events.
        let stored = session.bridge().load();
        if stored != last_stored {
            if stored != session.bearer() {
                debug!("Stored credential changed by another process");
                session.observe_external().await;
            }
            last_stored = stored;
        }
        session.check_expiry();
    }
}

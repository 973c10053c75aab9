//! Activity-driven renewal.
//!
//! The UI records every pointer move, click and key press on an
//! `ActivityBus`. The `ActivityMonitor` listens to the bus only while the
//! session reports imminent expiry; each burst of activity followed by a
//! quiet debounce window triggers one renewal.

use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use super::session::{Session, SessionSnapshot};
use super::timer::Debouncer;

/// Bus capacity. Signals only reset the debounce, so dropping old ones under
/// load loses nothing.
const ACTIVITY_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    PointerMove,
    Click,
    KeyPress,
}

/// Publisher of user interaction signals. Clone is cheap.
#[derive(Clone)]
pub struct ActivityBus {
    tx: broadcast::Sender<Activity>,
}

impl Default for ActivityBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(ACTIVITY_BUFFER_SIZE);
        Self { tx }
    }

    /// Record one interaction. Without an attached listener this is a no-op.
    pub fn record(&self, activity: Activity) {
        if self.tx.send(activity).is_err() {
            trace!(?activity, "No activity listener attached");
        }
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn attach(&self) -> broadcast::Receiver<Activity> {
        self.tx.subscribe()
    }
}

/// Attaches to the activity bus while renewal is warranted and turns bursts
/// of activity into single `renew()` calls.
pub struct ActivityMonitor {
    session: Session,
    bus: ActivityBus,
    snapshots: watch::Receiver<SessionSnapshot>,
    listener: Option<broadcast::Receiver<Activity>>,
    debounce: Debouncer,
}

impl ActivityMonitor {
    pub fn new(session: Session, bus: ActivityBus) -> Self {
        let snapshots = session.subscribe();
        let debounce = Debouncer::new(session.settings().debounce());
        Self {
            session,
            bus,
            snapshots,
            listener: None,
            debounce,
        }
    }

    /// Run until the snapshot channel closes or the task is aborted.
    pub async fn run(mut self) {
        self.reconcile();
        loop {
            tokio::select! {
                biased;
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.reconcile();
                }
                signal = next_signal(&mut self.listener) => match signal {
                    Ok(activity) => {
                        trace!(?activity, "Activity observed");
                        self.debounce.reset();
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!(skipped, "Activity listener lagged");
                        self.debounce.reset();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.listener = None;
                    }
                },
                () = self.debounce.fired() => {
                    debug!("Activity settled, renewing credential");
                    let session = self.session.clone();
                    tokio::spawn(async move {
                        session.renew().await;
                    });
                }
            }
        }
        self.detach();
    }

    /// Attach exactly while authenticated with imminent expiry.
    fn reconcile(&mut self) {
        let wanted = {
            let snapshot = self.snapshots.borrow_and_update();
            snapshot.is_authenticated() && snapshot.imminent_expiry()
        };
        match (wanted, self.listener.is_some()) {
            (true, false) => {
                debug!("Imminent expiry, listening for activity");
                self.listener = Some(self.bus.attach());
            }
            (false, true) => {
                debug!("Activity listener detached");
                self.detach();
            }
            _ => {}
        }
    }

    fn detach(&mut self) {
        self.listener = None;
        self.debounce.cancel();
    }
}

async fn next_signal(
    listener: &mut Option<broadcast::Receiver<Activity>>,
) -> Result<Activity, broadcast::error::RecvError> {
    match listener {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

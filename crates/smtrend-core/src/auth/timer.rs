//! Cancel-and-reschedule primitives backing the logout timer and the
//! activity debounce.

use std::future::{self, Future};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Holds at most one scheduled callback.
///
/// Arming replaces (and aborts) whatever was armed before; dropping the slot
/// aborts the armed task.
#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `delay`, cancelling any previously armed task.
    pub fn arm<F>(&mut self, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            callback.await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// True while a callback is scheduled and has not yet completed.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Collapses a burst of signals into a single deadline `window` after the
/// last one.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Push the deadline out to `window` from now.
    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the current deadline passes; never resolves while idle.
    /// The deadline is consumed, so each burst fires once.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => future::pending().await,
        }
    }
}

//! Authentication module for the client-held bearer credential.
//!
//! This module provides:
//! - `Credential`/`Claims`: decoding of the signed credential's payload
//! - `SharedStorage`/`PersistenceBridge`: durable storage shared by every tab
//! - `Session`: the anonymous/authenticated state machine with its logout timer
//! - `ActivityMonitor`: renews the credential on user activity near expiry
//! - `CrossTabSync`: applies credential changes made by other tabs
//! - `SessionHost`: starts a session together with its background tasks

pub mod activity;
pub mod claims;
pub mod clock;
pub mod host;
pub mod session;
pub mod store;
pub mod sync;
pub mod timer;

pub use activity::{Activity, ActivityBus, ActivityMonitor};
pub use claims::{decode, Claims, ClaimsError, Credential};
pub use clock::{AnchoredClock, Clock, SystemClock};
pub use host::SessionHost;
pub use session::{
    CurrentUser, Notice, RenewOutcome, Session, SessionError, SessionSnapshot, SessionState,
};
pub use store::{
    FileBackend, MemoryBackend, PersistenceBridge, SharedStorage, StorageBackend, StorageEvent,
    StoreError, TabId,
};
pub use sync::CrossTabSync;
pub use timer::{Debouncer, TimerSlot};

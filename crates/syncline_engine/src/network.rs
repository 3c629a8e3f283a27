//! Connectivity state shared between the network monitor and the
//! scheduler.

use std::sync::atomic::{AtomicBool, Ordering};

/// Current connectivity as reported by the platform's network monitor.
///
/// The engine does not probe the network itself; an external monitor
/// calls [`crate::SyncEngine::notify_connectivity`] on transitions, and
/// an `online` transition triggers an immediate flush attempt.
#[derive(Debug)]
pub struct ConnectivityState {
    online: AtomicBool,
}

impl ConnectivityState {
    /// Creates the state with an initial connectivity assumption.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Returns true if the device is believed to be online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records a connectivity transition. Returns true if the state
    /// changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst) != online
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new(true)
    }
}

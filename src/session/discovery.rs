use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use super::SessionRef;

/// Receives session lifecycle events from a discovery source.
pub trait DiscoveryListener: Send + Sync {
    /// A new or replacement session is available.
    fn session_changed(&self, session: SessionRef);

    /// `session` is about to close.
    fn session_closing(&self, session: &SessionRef);
}

/// A producer of sessions, typically zeroconf discovery on the LAN.
///
/// Wrappers register exactly one listener with it.
pub trait DiscoverySource: Send + Sync {
    fn set_listener(&self, listener: Arc<dyn DiscoveryListener>);
}

/// In-process discovery source driven explicitly by its owner.
///
/// Hosts that obtain sessions elsewhere (and tests) call [`announce`] and
/// [`closing`] to deliver the same events real discovery would.
///
/// [`announce`]: ManualDiscovery::announce
/// [`closing`]: ManualDiscovery::closing
#[derive(Default)]
pub struct ManualDiscovery {
    listener: Mutex<Option<Arc<dyn DiscoveryListener>>>,
}

impl ManualDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn listener(&self) -> Option<Arc<dyn DiscoveryListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver "session changed". Returns `false` if nothing is listening.
    pub fn announce(&self, session: SessionRef) -> bool {
        match self.listener() {
            Some(l) => {
                debug!(device_id = %session.device_id(), "Announcing session");
                l.session_changed(session);
                true
            }
            None => false,
        }
    }

    /// Deliver "session closing". Returns `false` if nothing is listening.
    pub fn closing(&self, session: &SessionRef) -> bool {
        match self.listener() {
            Some(l) => {
                l.session_closing(session);
                true
            }
            None => false,
        }
    }
}

impl DiscoverySource for ManualDiscovery {
    fn set_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }
}

//! Reactive session holder.
//!
//! Reads go through an [`ArcSwapOption`] and never block. Writers (`set`,
//! `clear`, lazy invalidation, close events) serialize on a transition mutex
//! that request threads never take, and re-check pointer identity under it.
//! Listener callbacks and session disposal run after the mutex is released, so
//! a listener may call back into the wrapper.

use arc_swap::ArcSwapOption;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, info};

use super::discovery::{DiscoveryListener, DiscoverySource};
use super::{same_session, ReconnectionListener, SessionListener, SessionRef};
use crate::events::{ApiEvent, EventRelay};

/// Notification produced under the transition lock and run after it.
pub(crate) type Deferred = Box<dyn FnOnce() + Send>;

/// Extra state kept in lockstep with the session, built right after a session
/// is stored and torn down right before it is dropped.
pub(crate) trait Attachment: Send + Sync {
    fn attach(&self, session: &SessionRef) -> Option<Deferred>;
    fn detach(&self) -> Option<Deferred>;
}

/// Reactive options of a wrapper.
///
/// With a relay, the wrapper forwards the session's reconnection events and
/// its own session transitions to `/events` subscribers.
#[derive(Clone, Default)]
pub struct ReactiveConfig {
    relay: Option<Arc<EventRelay>>,
}

impl ReactiveConfig {
    /// No companion relay.
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn relaying(relay: Arc<EventRelay>) -> Self {
        Self { relay: Some(relay) }
    }

    #[must_use]
    pub fn relay(&self) -> Option<&Arc<EventRelay>> {
        self.relay.as_ref()
    }
}

struct Bound {
    session: SessionRef,
}

struct Core {
    current: ArcSwapOption<Bound>,
    transition: Mutex<()>,
    listener: Mutex<Option<Arc<dyn SessionListener>>>,
    config: ReactiveConfig,
    attachment: Option<Arc<dyn Attachment>>,
}

impl Core {
    fn listener(&self) -> Option<Arc<dyn SessionListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(self: &Arc<Self>, session: SessionRef) {
        let (detached, attached) = {
            let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
            let detached = self.attachment.as_ref().and_then(|a| a.detach());
            self.current.store(Some(Arc::new(Bound {
                session: Arc::clone(&session),
            })));
            self.watch(&session);
            let attached = self.attachment.as_ref().and_then(|a| a.attach(&session));
            (detached, attached)
        };

        info!(
            device_id = %session.device_id(),
            username = %session.username(),
            "Session bound"
        );
        if let Some(notify) = detached {
            notify();
        }
        if let Some(listener) = self.listener() {
            listener.on_new_session(&session);
        }
        if let Some(notify) = attached {
            notify();
        }
        if let Some(relay) = self.config.relay() {
            relay.emit(&ApiEvent::SessionChanged {
                username: session.username(),
                device_id: session.device_id(),
            });
        }
    }

    /// Register for `session`'s close event and attach the reconnection relay.
    fn watch(self: &Arc<Self>, session: &SessionRef) {
        let core = Arc::downgrade(self);
        let target: Weak<dyn super::Session> = Arc::downgrade(session);
        session.set_close_listener(Some(Box::new(move || {
            if let (Some(core), Some(session)) = (core.upgrade(), target.upgrade()) {
                core.clear(Some(&session), "session closed");
            }
        })));
        if let Some(relay) = self.config.relay() {
            let relay: Arc<dyn ReconnectionListener> = Arc::clone(relay) as _;
            session.set_reconnection_listener(Some(relay));
        }
    }

    /// Drop the current session. With `expected`, only if it is still current.
    fn clear(&self, expected: Option<&SessionRef>, reason: &'static str) {
        let (old, detached) = {
            let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(bound) = self.current.load_full() else {
                return;
            };
            if let Some(expected) = expected {
                if !same_session(&bound.session, expected) {
                    debug!(reason, "Ignoring clear for a session that is no longer current");
                    return;
                }
            }
            let detached = self.attachment.as_ref().and_then(|a| a.detach());
            self.current.store(None);
            (Arc::clone(&bound.session), detached)
        };

        info!(device_id = %old.device_id(), reason, "Session cleared");
        // Re-enters `clear` through the close listener; identity no longer matches.
        old.close();
        if let Some(notify) = detached {
            notify();
        }
        if let Some(listener) = self.listener() {
            listener.on_session_cleared(&old);
        }
        if let Some(relay) = self.config.relay() {
            relay.emit(&ApiEvent::SessionCleared);
        }
    }
}

struct DiscoveryBridge {
    core: Weak<Core>,
}

impl DiscoveryListener for DiscoveryBridge {
    fn session_changed(&self, session: SessionRef) {
        if let Some(core) = self.core.upgrade() {
            core.set(session);
        }
    }

    fn session_closing(&self, session: &SessionRef) {
        if let Some(core) = self.core.upgrade() {
            core.clear(Some(session), "session closing");
        }
    }
}

/// Holds the current session, if any, in sync with its lifecycle.
///
/// Cloning is cheap and every clone observes the same state.
#[derive(Clone)]
pub struct SessionWrapper {
    core: Arc<Core>,
}

impl SessionWrapper {
    /// Bind to a discovery source. The wrapper stays empty until the source
    /// reports a session.
    #[must_use]
    pub fn from_discovery(source: &dyn DiscoverySource, config: ReactiveConfig) -> Self {
        let wrapper = Self::detached(config, None);
        wrapper.listen_to(source);
        wrapper
    }

    /// Bind to a session that is already live.
    #[must_use]
    pub fn from_session(session: SessionRef, config: ReactiveConfig) -> Self {
        let wrapper = Self::detached(config, None);
        wrapper.set(session);
        wrapper
    }

    pub(crate) fn detached(
        config: ReactiveConfig,
        attachment: Option<Arc<dyn Attachment>>,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                current: ArcSwapOption::empty(),
                transition: Mutex::new(()),
                listener: Mutex::new(None),
                config,
                attachment,
            }),
        }
    }

    pub(crate) fn listen_to(&self, source: &dyn DiscoverySource) {
        source.set_listener(Arc::new(DiscoveryBridge {
            core: Arc::downgrade(&self.core),
        }));
    }

    /// The current session if it reports itself valid.
    ///
    /// An invalid session is cleared on the spot, as if it had closed, and
    /// `None` is returned. Never blocks while the session is valid.
    #[must_use]
    pub fn session(&self) -> Option<SessionRef> {
        let stale = {
            let guard = self.core.current.load();
            let bound = (*guard).as_ref()?;
            if bound.session.is_valid() {
                return Some(Arc::clone(&bound.session));
            }
            Arc::clone(&bound.session)
        };
        self.core.clear(Some(&stale), "session reported invalid");
        None
    }

    /// Make `session` current.
    ///
    /// A replaced session is not closed; it belongs to the discovery layer,
    /// and its later close event is ignored.
    pub fn set(&self, session: SessionRef) {
        self.core.set(session);
    }

    /// Close and drop the current session, if any.
    pub fn clear(&self) {
        self.core.clear(None, "cleared");
    }

    /// Drop `session` only if it is still the current one.
    pub fn clear_if_current(&self, session: &SessionRef) {
        self.core.clear(Some(session), "cleared");
    }

    /// Replace the listener. If a session is held, the new listener is told
    /// about it right away.
    pub fn set_listener(&self, listener: Arc<dyn SessionListener>) {
        *self
            .core
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&listener));
        if let Some(session) = self.session() {
            listener.on_new_session(&session);
        }
    }

    #[must_use]
    pub fn relay(&self) -> Option<&Arc<EventRelay>> {
        self.core.config.relay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackSession;
    use crate::session::ManualDiscovery;
    use crate::session::Session;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        new: AtomicUsize,
        cleared: AtomicUsize,
    }

    impl SessionListener for Counting {
        fn on_session_cleared(&self, _session: &SessionRef) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }

        fn on_new_session(&self, _session: &SessionRef) {
            self.new.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stale_close_keeps_newer_session() {
        let discovery = ManualDiscovery::new();
        let wrapper = SessionWrapper::from_discovery(&discovery, ReactiveConfig::silent());
        let s1: SessionRef = LoopbackSession::new("one");
        let s2: SessionRef = LoopbackSession::new("two");

        discovery.announce(Arc::clone(&s1));
        discovery.announce(Arc::clone(&s2));
        discovery.closing(&s1);
        s1.close();

        let current = wrapper.session().unwrap();
        assert!(same_session(&current, &s2));
    }

    #[test]
    fn test_session_read_is_idempotent() {
        let s: SessionRef = LoopbackSession::new("dev");
        let wrapper = SessionWrapper::from_session(Arc::clone(&s), ReactiveConfig::silent());
        let a = wrapper.session().unwrap();
        let b = wrapper.session().unwrap();
        assert!(same_session(&a, &b));
    }

    #[test]
    fn test_invalid_session_is_cleared_lazily() {
        let s = LoopbackSession::new("dev");
        let wrapper =
            SessionWrapper::from_session(Arc::clone(&s) as SessionRef, ReactiveConfig::silent());
        let listener = Arc::new(Counting::default());
        wrapper.set_listener(Arc::clone(&listener) as Arc<dyn SessionListener>);

        s.invalidate();
        assert!(wrapper.session().is_none());
        assert_eq!(listener.cleared.load(Ordering::SeqCst), 1);
        assert!(s.is_closed());
    }

    #[test]
    fn test_listener_gets_current_state_on_registration() {
        let wrapper =
            SessionWrapper::from_session(LoopbackSession::new("dev"), ReactiveConfig::silent());
        let listener = Arc::new(Counting::default());
        wrapper.set_listener(Arc::clone(&listener) as Arc<dyn SessionListener>);
        assert_eq!(listener.new.load(Ordering::SeqCst), 1);
        assert_eq!(listener.cleared.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_session_close_clears_wrapper_once() {
        let s = LoopbackSession::new("dev");
        let wrapper =
            SessionWrapper::from_session(Arc::clone(&s) as SessionRef, ReactiveConfig::silent());
        let listener = Arc::new(Counting::default());
        wrapper.set_listener(Arc::clone(&listener) as Arc<dyn SessionListener>);

        s.close();
        assert!(wrapper.session().is_none());
        assert_eq!(listener.cleared.load(Ordering::SeqCst), 1);

        wrapper.clear();
        assert_eq!(listener.cleared.load(Ordering::SeqCst), 1);
    }
}

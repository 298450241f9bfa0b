//! # Session Module
//!
//! Reactive holders for the externally managed streaming session and the
//! playback engine bound to it.
//!
//! The session, the engine and the discovery layer are collaborators owned by
//! other subsystems; this module only consumes them through the traits below.
//! [`SessionWrapper`] and [`PlayerWrapper`] keep a local reference in sync with
//! their lifecycle events and hand request threads a lock-free snapshot.
//!
//! ## Identity
//!
//! Sessions are compared by `Arc` pointer identity ([`same_session`]). A close
//! event for a session that is no longer current never clears the newer one.

mod discovery;
mod engine;
mod player;
mod wrapper;

use std::sync::Arc;

pub use discovery::{DiscoveryListener, DiscoverySource, ManualDiscovery};
pub use engine::{
    PlaybackState, Player, PlayerEvent, PlayerEventListener, PlayerFactory, PlayerListener,
    PlayerRef, MAX_VOLUME,
};
pub use player::PlayerWrapper;
pub use wrapper::{ReactiveConfig, SessionWrapper};

/// Shared handle to a session.
pub type SessionRef = Arc<dyn Session>;

/// Callback fired once when a session closes.
pub type CloseListener = Box<dyn Fn() + Send + Sync>;

/// Contract of the externally managed session.
pub trait Session: Send + Sync {
    /// Whether the session can still serve requests.
    fn is_valid(&self) -> bool;

    /// Whether the session lost its connection and is trying to re-establish it.
    fn is_reconnecting(&self) -> bool;

    /// Dispose the session. Fires the close listener, if any.
    fn close(&self);

    /// Replace the single close-listener slot.
    fn set_close_listener(&self, listener: Option<CloseListener>);

    /// Replace the single reconnection-listener slot.
    fn set_reconnection_listener(&self, listener: Option<Arc<dyn ReconnectionListener>>);

    fn device_id(&self) -> String;

    fn device_name(&self) -> String;

    fn username(&self) -> String;
}

/// Receives connection-loss events of a session.
pub trait ReconnectionListener: Send + Sync {
    fn on_connection_dropped(&self);
    fn on_connection_established(&self);
}

/// Observer of session transitions on a [`SessionWrapper`].
pub trait SessionListener: Send + Sync {
    /// The wrapper dropped `session`, which has been closed.
    fn on_session_cleared(&self, session: &SessionRef);

    /// The wrapper now holds `session`.
    fn on_new_session(&self, session: &SessionRef);
}

/// Pointer identity of two session handles.
#[must_use]
pub fn same_session(a: &SessionRef, b: &SessionRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

//! Playback engine bound one-to-one to the current session.

use arc_swap::ArcSwapOption;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use super::discovery::DiscoverySource;
use super::engine::{PlayerEventListener, PlayerFactory, PlayerListener, PlayerRef};
use super::wrapper::{Attachment, Deferred, ReactiveConfig, SessionWrapper};
use super::{SessionListener, SessionRef};
use crate::config::PlayerConfig;
use crate::events::EventRelay;

struct BoundPlayer {
    player: PlayerRef,
}

struct PlayerSlot {
    engine: ArcSwapOption<BoundPlayer>,
    factory: Option<Arc<dyn PlayerFactory>>,
    config: PlayerConfig,
    /// Engine supplied together with a live session, used for the first bind
    preset: Mutex<Option<PlayerRef>>,
    listener: Mutex<Option<Arc<dyn PlayerListener>>>,
    relay: Option<Arc<EventRelay>>,
}

impl PlayerSlot {
    fn listener(&self) -> Option<Arc<dyn PlayerListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Attachment for PlayerSlot {
    fn attach(&self, session: &SessionRef) -> Option<Deferred> {
        let preset = self
            .preset
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let player = match (preset, &self.factory) {
            (Some(player), _) => player,
            (None, Some(factory)) => factory.create(&self.config, session),
            (None, None) => {
                warn!(
                    device_id = %session.device_id(),
                    "No player factory configured, session bound without a player"
                );
                return None;
            }
        };

        if let Some(relay) = &self.relay {
            let relay: Arc<dyn PlayerEventListener> = Arc::clone(relay) as _;
            player.set_event_listener(Some(relay));
        }
        self.engine.store(Some(Arc::new(BoundPlayer {
            player: Arc::clone(&player),
        })));
        info!(device_id = %session.device_id(), "Player created");

        let listener = self.listener();
        Some(Box::new(move || {
            if let Some(listener) = listener {
                listener.on_new_player(&player);
            }
        }))
    }

    fn detach(&self) -> Option<Deferred> {
        let old = self.engine.swap(None)?;
        let player = Arc::clone(&old.player);
        player.set_event_listener(None);
        player.close();
        info!("Player disposed");

        let listener = self.listener();
        Some(Box::new(move || {
            if let Some(listener) = listener {
                listener.on_player_cleared(&player);
            }
        }))
    }
}

/// A [`SessionWrapper`] that also owns the playback engine of the current
/// session.
///
/// The engine is built right after a session is stored and disposed right
/// before it is dropped, so [`player`](Self::player) never returns an engine
/// whose session has been cleared.
#[derive(Clone)]
pub struct PlayerWrapper {
    sessions: SessionWrapper,
    slot: Arc<PlayerSlot>,
}

impl PlayerWrapper {
    fn build(
        config: ReactiveConfig,
        factory: Option<Arc<dyn PlayerFactory>>,
        player_config: PlayerConfig,
        preset: Option<PlayerRef>,
    ) -> Self {
        let slot = Arc::new(PlayerSlot {
            engine: ArcSwapOption::empty(),
            factory,
            config: player_config,
            preset: Mutex::new(preset),
            listener: Mutex::new(None),
            relay: config.relay().map(Arc::clone),
        });
        let attachment: Arc<dyn Attachment> = Arc::clone(&slot) as _;
        Self {
            sessions: SessionWrapper::detached(config, Some(attachment)),
            slot,
        }
    }

    /// Bind to a discovery source; every session it reports gets a fresh
    /// engine from `factory`.
    #[must_use]
    pub fn from_discovery(
        source: &dyn DiscoverySource,
        config: ReactiveConfig,
        factory: Arc<dyn PlayerFactory>,
        player_config: PlayerConfig,
    ) -> Self {
        let wrapper = Self::build(config, Some(factory), player_config, None);
        wrapper.sessions.listen_to(source);
        wrapper
    }

    /// Bind to a live session and build its engine right away.
    #[must_use]
    pub fn from_session(
        session: SessionRef,
        config: ReactiveConfig,
        factory: Arc<dyn PlayerFactory>,
        player_config: PlayerConfig,
    ) -> Self {
        let wrapper = Self::build(config, Some(factory), player_config, None);
        wrapper.sessions.set(session);
        wrapper
    }

    /// Wrap a session and engine that already run together.
    ///
    /// Without a factory, later sessions set on this wrapper get no engine.
    #[must_use]
    pub fn from_parts(session: SessionRef, player: PlayerRef, config: ReactiveConfig) -> Self {
        let wrapper = Self::build(config, None, PlayerConfig::default(), Some(player));
        wrapper.sessions.set(session);
        wrapper
    }

    /// Validated current session; see [`SessionWrapper::session`].
    #[must_use]
    pub fn session(&self) -> Option<SessionRef> {
        self.sessions.session()
    }

    /// Current engine. Does not re-validate the session.
    #[must_use]
    pub fn player(&self) -> Option<PlayerRef> {
        let guard = self.slot.engine.load();
        (*guard).as_ref().map(|bound| Arc::clone(&bound.player))
    }

    /// The underlying session wrapper, sharing state with this one.
    #[must_use]
    pub fn sessions(&self) -> &SessionWrapper {
        &self.sessions
    }

    pub fn set(&self, session: SessionRef) {
        self.sessions.set(session);
    }

    /// Dispose the engine, then close and drop the session.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    pub fn set_listener(&self, listener: Arc<dyn SessionListener>) {
        self.sessions.set_listener(listener);
    }

    /// Replace the player listener. If an engine exists, the new listener is
    /// told about it right away.
    pub fn set_player_listener(&self, listener: Arc<dyn PlayerListener>) {
        *self
            .slot
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&listener));
        if let Some(player) = self.player() {
            listener.on_new_player(&player);
        }
    }

    #[must_use]
    pub fn player_config(&self) -> &PlayerConfig {
        &self.slot.config
    }
}

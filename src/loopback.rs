//! In-memory session and playback engine.
//!
//! `serve --loopback` runs the API against these so the HTTP surface can be
//! exercised without a streaming backend; the test suites use them as doubles.
//! Listeners are always invoked after internal locks are released.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::config::PlayerConfig;
use crate::session::{
    CloseListener, PlaybackState, Player, PlayerEvent, PlayerEventListener, PlayerFactory,
    PlayerRef, ReconnectionListener, Session, SessionRef, MAX_VOLUME,
};

/// Within this offset `previous` restarts the track instead of going back.
const RESTART_THRESHOLD_MS: u64 = 3000;

pub struct LoopbackSession {
    device_id: String,
    device_name: String,
    username: String,
    valid: AtomicBool,
    reconnecting: AtomicBool,
    closed: AtomicBool,
    close_listener: Mutex<Option<CloseListener>>,
    reconnection_listener: Mutex<Option<Arc<dyn ReconnectionListener>>>,
}

impl LoopbackSession {
    #[must_use]
    pub fn new(device_name: &str) -> Arc<Self> {
        Self::with_identity(
            &ulid::Ulid::new().to_string().to_ascii_lowercase(),
            device_name,
            "loopback",
        )
    }

    #[must_use]
    pub fn with_identity(device_id: &str, device_name: &str, username: &str) -> Arc<Self> {
        Arc::new(Self {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            username: username.to_string(),
            valid: AtomicBool::new(true),
            reconnecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_listener: Mutex::new(None),
            reconnection_listener: Mutex::new(None),
        })
    }

    /// Make the session report itself invalid without closing it.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Enter or leave the reconnecting state, notifying the reconnection
    /// listener on every change.
    pub fn set_reconnecting(&self, reconnecting: bool) {
        if self.reconnecting.swap(reconnecting, Ordering::SeqCst) == reconnecting {
            return;
        }
        let listener = self
            .reconnection_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            if reconnecting {
                listener.on_connection_dropped();
            } else {
                listener.on_connection_established();
            }
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Session for LoopbackSession {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst) && !self.is_closed()
    }

    fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.valid.store(false, Ordering::SeqCst);
        debug!(device_id = %self.device_id, "Loopback session closed");
        let listener = self
            .close_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener();
        }
    }

    fn set_close_listener(&self, listener: Option<CloseListener>) {
        *self
            .close_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    fn set_reconnection_listener(&self, listener: Option<Arc<dyn ReconnectionListener>>) {
        *self
            .reconnection_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    fn device_name(&self) -> String {
        self.device_name.clone()
    }

    fn username(&self) -> String {
        self.username.clone()
    }
}

#[derive(Default)]
struct Queue {
    tracks: Vec<String>,
    index: usize,
}

/// Engine that only keeps state: a queue of loaded URIs, a play flag, a
/// position that moves on seek and a volume.
pub struct LoopbackPlayer {
    state: Mutex<(PlaybackState, Queue)>,
    step: u32,
    closed: AtomicBool,
    listener: Mutex<Option<Arc<dyn PlayerEventListener>>>,
}

impl LoopbackPlayer {
    #[must_use]
    pub fn new(config: &PlayerConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new((
                PlaybackState {
                    volume: config.initial_volume.min(MAX_VOLUME),
                    ..PlaybackState::default()
                },
                Queue::default(),
            )),
            step: config.volume_step(),
            closed: AtomicBool::new(false),
            listener: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Apply `change` under the state lock, then deliver the events it
    /// returned with the lock released.
    fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut PlaybackState, &mut Queue) -> Vec<PlayerEvent>,
    {
        let events = {
            let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let (state, queue) = &mut *guard;
            change(state, queue)
        };
        if events.is_empty() {
            return;
        }
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            for event in events {
                listener.on_player_event(event);
            }
        }
    }

    fn set_volume_with(&self, volume: impl FnOnce(u32) -> u32) {
        self.update(|state, _| {
            let next = volume(state.volume).min(MAX_VOLUME);
            if next == state.volume {
                return Vec::new();
            }
            state.volume = next;
            vec![PlayerEvent::VolumeChanged { volume: next }]
        });
    }

    fn jump(state: &mut PlaybackState, queue: &Queue) -> Vec<PlayerEvent> {
        let Some(uri) = queue.tracks.get(queue.index) else {
            return Vec::new();
        };
        state.track_uri = Some(uri.clone());
        state.position_ms = 0;
        vec![PlayerEvent::TrackChanged { uri: uri.clone() }]
    }
}

impl Player for LoopbackPlayer {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Loopback player closed");
        }
    }

    fn set_event_listener(&self, listener: Option<Arc<dyn PlayerEventListener>>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    fn load(&self, uri: &str, play: bool) {
        self.update(|state, queue| {
            queue.tracks.push(uri.to_string());
            queue.index = queue.tracks.len() - 1;
            let mut events = Self::jump(state, queue);
            if play != state.playing {
                state.playing = play;
                events.push(if play {
                    PlayerEvent::Resumed { position_ms: 0 }
                } else {
                    PlayerEvent::Paused { position_ms: 0 }
                });
            }
            events
        });
    }

    fn play(&self) {
        self.update(|state, _| {
            if state.playing || state.track_uri.is_none() {
                return Vec::new();
            }
            state.playing = true;
            vec![PlayerEvent::Resumed {
                position_ms: state.position_ms,
            }]
        });
    }

    fn pause(&self) {
        self.update(|state, _| {
            if !state.playing {
                return Vec::new();
            }
            state.playing = false;
            vec![PlayerEvent::Paused {
                position_ms: state.position_ms,
            }]
        });
    }

    fn play_pause(&self) {
        let playing = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0
            .playing;
        if playing {
            self.pause();
        } else {
            self.play();
        }
    }

    fn next(&self) {
        self.update(|state, queue| {
            if queue.index + 1 >= queue.tracks.len() {
                state.playing = false;
                return vec![PlayerEvent::Ended];
            }
            queue.index += 1;
            Self::jump(state, queue)
        });
    }

    fn previous(&self) {
        self.update(|state, queue| {
            if state.position_ms > RESTART_THRESHOLD_MS || queue.index == 0 {
                state.position_ms = 0;
                return vec![PlayerEvent::Seeked { position_ms: 0 }];
            }
            queue.index -= 1;
            Self::jump(state, queue)
        });
    }

    fn seek(&self, position_ms: u64) {
        self.update(|state, _| {
            if state.track_uri.is_none() {
                return Vec::new();
            }
            state.position_ms = position_ms;
            vec![PlayerEvent::Seeked { position_ms }]
        });
    }

    fn set_volume(&self, volume: u32) {
        self.set_volume_with(|_| volume);
    }

    fn volume_up(&self) {
        let step = self.step;
        self.set_volume_with(|v| v.saturating_add(step));
    }

    fn volume_down(&self) {
        let step = self.step;
        self.set_volume_with(|v| v.saturating_sub(step));
    }

    fn state(&self) -> PlaybackState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0
            .clone()
    }
}

/// Builds a [`LoopbackPlayer`] per session and remembers the latest one.
#[derive(Default)]
pub struct LoopbackPlayerFactory {
    created: AtomicUsize,
    last: Mutex<Option<Arc<LoopbackPlayer>>>,
}

impl LoopbackPlayerFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last(&self) -> Option<Arc<LoopbackPlayer>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl PlayerFactory for LoopbackPlayerFactory {
    fn create(&self, config: &PlayerConfig, session: &SessionRef) -> PlayerRef {
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!(device_id = %session.device_id(), "Creating loopback player");
        let player = LoopbackPlayer::new(config);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&player));
        player
    }
}

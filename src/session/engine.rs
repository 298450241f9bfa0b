use serde::Serialize;
use std::sync::Arc;

use super::SessionRef;
use crate::config::PlayerConfig;

/// Full-scale volume. Engine volumes range over `0..=MAX_VOLUME`.
pub const MAX_VOLUME: u32 = 65536;

/// Shared handle to a playback engine.
pub type PlayerRef = Arc<dyn Player>;

/// Snapshot of what the engine is doing, returned by every player command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackState {
    pub track_uri: Option<String>,
    pub playing: bool,
    pub position_ms: u64,
    pub volume: u32,
}

/// Playback event emitted by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    TrackChanged { uri: String },
    Paused { position_ms: u64 },
    Resumed { position_ms: u64 },
    Seeked { position_ms: u64 },
    /// New absolute volume, `0..=MAX_VOLUME`
    VolumeChanged { volume: u32 },
    Ended,
    Inactive { timeout: bool },
}

/// Receives an engine's playback events.
pub trait PlayerEventListener: Send + Sync {
    fn on_player_event(&self, event: PlayerEvent);
}

/// Contract of the playback engine. Decoding and output live behind it.
pub trait Player: Send + Sync {
    /// Dispose the engine. Called by the wrapper before the session is dropped.
    fn close(&self);

    /// Replace the single event-listener slot.
    fn set_event_listener(&self, listener: Option<Arc<dyn PlayerEventListener>>);

    fn load(&self, uri: &str, play: bool);
    fn play(&self);
    fn pause(&self);
    fn play_pause(&self);
    fn next(&self);
    fn previous(&self);
    fn seek(&self, position_ms: u64);

    /// Set the absolute volume, `0..=MAX_VOLUME`.
    fn set_volume(&self, volume: u32);
    fn volume_up(&self);
    fn volume_down(&self);

    fn state(&self) -> PlaybackState;
}

/// Builds an engine for a freshly bound session.
pub trait PlayerFactory: Send + Sync {
    fn create(&self, config: &PlayerConfig, session: &SessionRef) -> PlayerRef;
}

/// Observer of engine transitions on a [`PlayerWrapper`](super::PlayerWrapper).
pub trait PlayerListener: Send + Sync {
    /// `player` was disposed because its session went away or was replaced.
    fn on_player_cleared(&self, player: &PlayerRef);

    /// `player` was built for the current session.
    fn on_new_player(&self, player: &PlayerRef);
}

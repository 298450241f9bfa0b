//! Event relay: fans session and playback events out to websocket subscribers.
//!
//! The relay is the companion forwarder the wrappers attach when
//! `events.relay` is enabled. It is the session's reconnection listener and
//! the engine's event listener, and it receives session changed/cleared
//! notifications from the wrappers themselves.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tungstenite::{Message, WebSocket};

use crate::ids::ConnectionId;
use crate::session::{PlayerEvent, PlayerEventListener, ReconnectionListener, MAX_VOLUME};

/// Write timeout applied to every subscriber socket so one stalled client
/// cannot hold up delivery to the others for long.
const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Event pushed to `/events` subscribers, serialized as `{"event": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ApiEvent {
    SessionChanged {
        username: String,
        device_id: String,
    },
    SessionCleared,
    ConnectionDropped,
    ConnectionEstablished,
    TrackChanged {
        uri: String,
    },
    PlaybackPaused {
        position_ms: u64,
    },
    PlaybackResumed {
        position_ms: u64,
    },
    TrackSeeked {
        position_ms: u64,
    },
    VolumeChanged {
        /// Volume as a fraction of the maximum, `0.0..=1.0`
        value: f64,
    },
    PlaybackEnded,
    InactiveSession {
        timeout: bool,
    },
}

impl From<PlayerEvent> for ApiEvent {
    fn from(event: PlayerEvent) -> Self {
        match event {
            PlayerEvent::TrackChanged { uri } => ApiEvent::TrackChanged { uri },
            PlayerEvent::Paused { position_ms } => ApiEvent::PlaybackPaused { position_ms },
            PlayerEvent::Resumed { position_ms } => ApiEvent::PlaybackResumed { position_ms },
            PlayerEvent::Seeked { position_ms } => ApiEvent::TrackSeeked { position_ms },
            PlayerEvent::VolumeChanged { volume } => ApiEvent::VolumeChanged {
                value: f64::from(volume.min(MAX_VOLUME)) / f64::from(MAX_VOLUME),
            },
            PlayerEvent::Ended => ApiEvent::PlaybackEnded,
            PlayerEvent::Inactive { timeout } => ApiEvent::InactiveSession { timeout },
        }
    }
}

struct Subscriber {
    id: ConnectionId,
    socket: WebSocket<TcpStream>,
}

/// Work for the delivery thread, in arrival order.
enum Outbound {
    Subscribe(Subscriber),
    Deliver(String),
}

/// Broadcasts [`ApiEvent`]s to every subscribed websocket.
///
/// [`emit`](Self::emit) only serializes and enqueues. A dedicated delivery
/// thread owns the sockets and does the blocking writes, so an emitter on a
/// request thread never waits on a slow subscriber. The thread exits once the
/// relay is dropped.
pub struct EventRelay {
    outbound: Option<Sender<Outbound>>,
    subscribers: Arc<AtomicUsize>,
    emitted: AtomicU64,
}

impl Default for EventRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRelay {
    /// Start the relay and its delivery thread.
    ///
    /// If the thread cannot be spawned the relay still accepts events and
    /// subscribers but delivers nothing; the failure is logged.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let subscribers = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&subscribers);
        let outbound = match thread::Builder::new()
            .name("connect-api-events".to_string())
            .spawn(move || deliver(&rx, &count))
        {
            Ok(_) => Some(tx),
            Err(e) => {
                error!(error = %e, "Failed to spawn event delivery thread; events will be dropped");
                None
            }
        };
        Self {
            outbound,
            subscribers,
            emitted: AtomicU64::new(0),
        }
    }

    fn enqueue(&self, item: Outbound) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        if outbound.send(item).is_err() {
            warn!("Event delivery thread is gone");
        }
    }

    /// Add an upgraded websocket to the broadcast set. Takes effect on the
    /// delivery thread, ahead of any event emitted after this call.
    pub fn subscribe(&self, id: ConnectionId, socket: WebSocket<TcpStream>) {
        if let Err(e) = socket
            .get_ref()
            .set_write_timeout(Some(SUBSCRIBER_WRITE_TIMEOUT))
        {
            warn!(connection_id = %id, error = %e, "Failed to set subscriber write timeout");
        }
        self.enqueue(Outbound::Subscribe(Subscriber { id, socket }));
    }

    /// Subscribers currently held by the delivery thread.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Total events emitted since start, whether or not anyone was listening.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Queue `event` for every subscriber. Never blocks on a socket.
    pub fn emit(&self, event: &ApiEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        match serde_json::to_string(event) {
            Ok(payload) => self.enqueue(Outbound::Deliver(payload)),
            Err(e) => warn!(error = %e, event = ?event, "Failed to serialize event"),
        }
    }
}

/// Delivery thread body. A subscriber whose socket fails is logged and
/// dropped; the failure never reaches the emitter.
fn deliver(rx: &Receiver<Outbound>, count: &AtomicUsize) {
    let mut subscribers: Vec<Subscriber> = Vec::new();
    while let Ok(item) = rx.recv() {
        match item {
            Outbound::Subscribe(sub) => {
                info!(
                    connection_id = %sub.id,
                    subscribers = subscribers.len() + 1,
                    "Event subscriber added"
                );
                subscribers.push(sub);
            }
            Outbound::Deliver(payload) => {
                if subscribers.is_empty() {
                    continue;
                }
                debug!(subscribers = subscribers.len(), payload = %payload, "Relaying event");
                subscribers.retain_mut(|sub| {
                    match sub.socket.send(Message::text(payload.clone())) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(connection_id = %sub.id, error = %e, "Dropping event subscriber");
                            false
                        }
                    }
                });
            }
        }
        count.store(subscribers.len(), Ordering::Release);
    }
    debug!("Event delivery thread exited");
}

impl ReconnectionListener for EventRelay {
    fn on_connection_dropped(&self) {
        self.emit(&ApiEvent::ConnectionDropped);
    }

    fn on_connection_established(&self) {
        self.emit(&ApiEvent::ConnectionEstablished);
    }
}

impl PlayerEventListener for EventRelay {
    fn on_player_event(&self, event: PlayerEvent) {
        self.emit(&ApiEvent::from(event));
    }
}

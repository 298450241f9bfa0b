//! # API Module
//!
//! The concrete control-plane routes, wired onto an [`HttpServer`].
//!
//! | Method | Path | Guard | Behavior |
//! |---|---|---|---|
//! | `GET` | `/` | session | device id, device name and username |
//! | `GET` | `/instance` | none | service name, version, uptime, session and player state |
//! | `POST` | `/instance/{action}` | session | `close` closes the session |
//! | `*` | `/player/{cmd}` | none | counts player commands, writes nothing |
//! | `POST` | `/player/{cmd}` | player | playback commands, returns the playback state |
//! | `GET` | `/metrics` | none | Prometheus text |
//! | `GET` | `/events` | none | websocket feed of session and playback events |
//!
//! Registration order is the table order above. `/events` exists only when
//! the event relay is enabled.

mod events;
mod instance;
mod metrics;
mod player;

use std::sync::Arc;
use std::time::Instant;

use crate::error::RouteError;
use crate::events::EventRelay;
use crate::handler::{exact_path, with_player, with_session, Handler};
use crate::metrics::ServerMetrics;
use crate::server::HttpServer;
use crate::session::PlayerWrapper;

pub use events::EventsUpgrade;
pub use instance::{InstanceAction, InstanceInfo, SessionStatus};
pub use metrics::{MetricsEndpoint, PlayerCommandObserver};
pub use player::{CommandError, PlayerCommand, PlayerCommands, COMMAND_NAMES, OTHER_COMMAND};

/// Everything the routes read from.
#[derive(Clone)]
pub struct ApiContext {
    pub players: PlayerWrapper,
    pub relay: Option<Arc<EventRelay>>,
    pub metrics: Arc<ServerMetrics>,
    /// Name reported by `GET /instance`
    pub name: String,
    pub started: Instant,
}

impl ApiContext {
    #[must_use]
    pub fn new(players: PlayerWrapper, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            relay: players.sessions().relay().map(Arc::clone),
            players,
            metrics,
            name: env!("CARGO_PKG_NAME").to_string(),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// All routes, in registration order.
#[must_use]
pub fn handlers(ctx: &ApiContext) -> Vec<Arc<dyn Handler>> {
    let sessions = ctx.players.sessions().clone();
    let mut handlers: Vec<Arc<dyn Handler>> = vec![
        Arc::new(exact_path("/", with_session(sessions.clone(), SessionStatus))),
        Arc::new(InstanceInfo::new(ctx)),
        Arc::new(with_session(sessions, InstanceAction)),
        Arc::new(PlayerCommandObserver::new(Arc::clone(&ctx.metrics))),
        Arc::new(with_player(
            ctx.players.clone(),
            PlayerCommands::new(ctx.players.player_config().clone()),
        )),
        Arc::new(MetricsEndpoint::new(Arc::clone(&ctx.metrics))),
    ];
    if let Some(relay) = &ctx.relay {
        handlers.push(Arc::new(EventsUpgrade::new(Arc::clone(relay))));
    }
    handlers
}

/// Register [`handlers`] on `server`.
///
/// # Errors
///
/// Only if a built-in route fails to compile, which indicates a bug.
pub fn register(server: &mut HttpServer, ctx: &ApiContext) -> Result<(), RouteError> {
    server.register_handlers(handlers(ctx))?;
    Ok(())
}

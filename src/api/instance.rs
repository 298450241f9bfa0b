use http::StatusCode;
use serde::Serialize;
use std::time::Instant;
use tracing::info;

use super::ApiContext;
use crate::handler::{Handler, Reply, RouteSpec, SessionHandler};
use crate::server::{ApiRequest, ApiResponse};
use crate::session::{PlaybackState, PlayerWrapper, SessionRef};

#[derive(Debug, Serialize)]
struct SessionBody {
    device_id: String,
    device_name: String,
    username: String,
}

impl SessionBody {
    fn of(session: &SessionRef) -> Self {
        Self {
            device_id: session.device_id(),
            device_name: session.device_name(),
            username: session.username(),
        }
    }
}

/// `GET /`: who the current session belongs to.
pub struct SessionStatus;

impl SessionHandler for SessionStatus {
    fn handle(&self, _req: &ApiRequest, session: &SessionRef) -> Reply {
        ApiResponse::json(StatusCode::OK, &SessionBody::of(session)).into()
    }
}

/// `POST /instance/{action}`.
///
/// `close` closes the current session; discovery may later bring up a new one.
pub struct InstanceAction;

impl SessionHandler for InstanceAction {
    fn route(&self) -> RouteSpec {
        RouteSpec::post("/instance/{action}")
    }

    fn handle(&self, req: &ApiRequest, session: &SessionRef) -> Reply {
        match req.param("action") {
            Some("close") => {
                info!(
                    connection_id = %req.connection_id,
                    device_id = %session.device_id(),
                    "Closing session on request"
                );
                session.close();
                ApiResponse::no_content().into()
            }
            other => ApiResponse::text(
                StatusCode::BAD_REQUEST,
                format!("Unknown action: {}", other.unwrap_or_default()),
            )
            .into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct InstanceBody {
    name: String,
    version: &'static str,
    uptime_secs: u64,
    session: Option<SessionBody>,
    player: Option<PlaybackState>,
}

/// `GET /instance`: service info. Never guarded; reports absence as `null`.
pub struct InstanceInfo {
    players: PlayerWrapper,
    name: String,
    started: Instant,
}

impl InstanceInfo {
    #[must_use]
    pub fn new(ctx: &ApiContext) -> Self {
        Self {
            players: ctx.players.clone(),
            name: ctx.name.clone(),
            started: ctx.started,
        }
    }
}

impl Handler for InstanceInfo {
    fn route(&self) -> RouteSpec {
        RouteSpec::get("/instance")
    }

    fn handle(&self, _req: &ApiRequest) -> Reply {
        let session = self.players.session();
        let player = session
            .as_ref()
            .and(self.players.player())
            .map(|p| p.state());
        let body = InstanceBody {
            name: self.name.clone(),
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started.elapsed().as_secs(),
            session: session.as_ref().map(SessionBody::of),
            player,
        };
        ApiResponse::json(StatusCode::OK, &body).into()
    }
}

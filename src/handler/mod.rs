//! # Handler Module
//!
//! The contract every route implements and the two decorators that guard
//! session and player access.
//!
//! ## Contracts
//!
//! - [`Handler`] is what the server dispatches to. It declares its route
//!   (default `GET /`) and turns an [`ApiRequest`] into a [`Reply`].
//! - [`SessionHandler`] and [`PlayerHandler`] are for handlers that need a
//!   usable session (and engine). They never see the unusable states:
//!   [`with_session`] and [`with_player`] wrap them into a [`Handler`] that
//!   maps those states to status codes first.
//!
//! ## Status Mapping
//!
//! | State | Response |
//! |---|---|
//! | no session | `204 No Content` |
//! | session reconnecting | `503 Service Unavailable`, `Retry-After: 10` |
//! | session invalid at the final check | `500 Internal Server Error` |
//! | session valid, no engine | `204 No Content` |
//!
//! Reconnecting is checked before the final validity check so a session that
//! is mid-reconnect is reported as retryable rather than broken.

use http::header::{HeaderValue, RETRY_AFTER};
use http::{Method, StatusCode};
use std::fmt;
use std::net::TcpStream;
use tracing::{debug, warn};

use crate::ids::ConnectionId;
use crate::server::{ApiRequest, ApiResponse};
use crate::session::{PlayerRef, PlayerWrapper, SessionRef, SessionWrapper};

/// Seconds a client should wait before retrying against a reconnecting session.
pub const RECONNECT_RETRY_AFTER_SECS: u32 = 10;

/// Method pattern and path template a handler is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    /// `*`, a verb, or a verb regex such as `GET|HEAD`
    pub method: String,
    pub path: String,
}

impl Default for RouteSpec {
    fn default() -> Self {
        Self::get("/")
    }
}

impl RouteSpec {
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET.as_str(), path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST.as_str(), path)
    }

    /// Any verb.
    #[must_use]
    pub fn any(path: impl Into<String>) -> Self {
        Self::new("*", path)
    }
}

/// Takes over the connection after a `101 Switching Protocols` is written.
pub type UpgradeFn = Box<dyn FnOnce(TcpStream, ConnectionId) + Send>;

/// A protocol switch: the handshake response and what to do with the socket.
pub struct Upgrade {
    pub response: ApiResponse,
    pub on_upgrade: UpgradeFn,
}

/// What a handler produced for one request.
pub enum Reply {
    /// Write this response.
    Response(ApiResponse),
    /// Write the handshake, then hand the socket over. No further routes run.
    Upgrade(Upgrade),
    /// Nothing to write; the handler only observed the request.
    Observed,
}

impl From<ApiResponse> for Reply {
    fn from(response: ApiResponse) -> Self {
        Reply::Response(response)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Response(r) => f.debug_tuple("Response").field(&r.status()).finish(),
            Reply::Upgrade(u) => f.debug_tuple("Upgrade").field(&u.response.status()).finish(),
            Reply::Observed => f.write_str("Observed"),
        }
    }
}

/// A route handler.
pub trait Handler: Send + Sync {
    /// Where the handler is registered. Defaults to `GET /`.
    fn route(&self) -> RouteSpec {
        RouteSpec::default()
    }

    fn handle(&self, req: &ApiRequest) -> Reply;
}

/// A handler that needs a usable session. Wrap with [`with_session`].
pub trait SessionHandler: Send + Sync {
    fn route(&self) -> RouteSpec {
        RouteSpec::default()
    }

    fn handle(&self, req: &ApiRequest, session: &SessionRef) -> Reply;
}

/// A handler that needs a usable session and its engine. Wrap with
/// [`with_player`].
pub trait PlayerHandler: Send + Sync {
    fn route(&self) -> RouteSpec {
        RouteSpec::default()
    }

    fn handle(&self, req: &ApiRequest, session: &SessionRef, player: &PlayerRef) -> Reply;
}

/// Resolve the current session or the response that replaces the handler.
///
/// # Errors
///
/// `Err` carries the `204`, `503` or `500` response for the unusable states.
pub fn check_session(sessions: &SessionWrapper) -> Result<SessionRef, ApiResponse> {
    let Some(session) = sessions.session() else {
        return Err(ApiResponse::no_content());
    };
    if session.is_reconnecting() {
        debug!(device_id = %session.device_id(), "Session is reconnecting");
        return Err(
            ApiResponse::text(StatusCode::SERVICE_UNAVAILABLE, "Session is reconnecting")
                .with_header(RETRY_AFTER, HeaderValue::from(RECONNECT_RETRY_AFTER_SECS)),
        );
    }
    if !session.is_valid() {
        warn!(device_id = %session.device_id(), "Session became invalid during request");
        return Err(ApiResponse::text(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Session is invalid",
        ));
    }
    Ok(session)
}

/// [`check_session`], then resolve the engine.
///
/// # Errors
///
/// As [`check_session`], plus `204` when no engine is bound.
pub fn check_player(players: &PlayerWrapper) -> Result<(SessionRef, PlayerRef), ApiResponse> {
    let session = check_session(players.sessions())?;
    match players.player() {
        Some(player) => Ok((session, player)),
        None => Err(ApiResponse::no_content()),
    }
}

/// [`Handler`] produced by [`with_session`].
pub struct WithSession<H> {
    sessions: SessionWrapper,
    next: H,
}

/// Guard `next` with the session checks.
pub fn with_session<H: SessionHandler>(sessions: SessionWrapper, next: H) -> WithSession<H> {
    WithSession { sessions, next }
}

impl<H: SessionHandler> Handler for WithSession<H> {
    fn route(&self) -> RouteSpec {
        self.next.route()
    }

    fn handle(&self, req: &ApiRequest) -> Reply {
        match check_session(&self.sessions) {
            Ok(session) => self.next.handle(req, &session),
            Err(response) => response.into(),
        }
    }
}

/// [`Handler`] produced by [`with_player`].
pub struct WithPlayer<H> {
    players: PlayerWrapper,
    next: H,
}

/// Guard `next` with the session checks and the engine check.
pub fn with_player<H: PlayerHandler>(players: PlayerWrapper, next: H) -> WithPlayer<H> {
    WithPlayer { players, next }
}

impl<H: PlayerHandler> Handler for WithPlayer<H> {
    fn route(&self) -> RouteSpec {
        self.next.route()
    }

    fn handle(&self, req: &ApiRequest) -> Reply {
        match check_player(&self.players) {
            Ok((session, player)) => self.next.handle(req, &session, &player),
            Err(response) => response.into(),
        }
    }
}

/// [`Handler`] produced by [`exact_path`].
pub struct ExactPath<H> {
    path: String,
    next: H,
}

/// Run `next` only for requests to exactly `path`; observe everything else.
///
/// The root template `/` matches every request path, so a handler meant for
/// the root itself is wrapped in this.
pub fn exact_path<H: Handler>(path: impl Into<String>, next: H) -> ExactPath<H> {
    ExactPath {
        path: path.into(),
        next,
    }
}

impl<H: Handler> Handler for ExactPath<H> {
    fn route(&self) -> RouteSpec {
        self.next.route()
    }

    fn handle(&self, req: &ApiRequest) -> Reply {
        if req.path == self.path {
            self.next.handle(req)
        } else {
            Reply::Observed
        }
    }
}

/// [`Handler`] backed by a closure.
pub struct FnHandler<F> {
    route: RouteSpec,
    f: F,
}

/// Build a handler from a route and a closure.
pub fn from_fn<F>(route: RouteSpec, f: F) -> FnHandler<F>
where
    F: Fn(&ApiRequest) -> Reply + Send + Sync,
{
    FnHandler { route, f }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&ApiRequest) -> Reply + Send + Sync,
{
    fn route(&self) -> RouteSpec {
        self.route.clone()
    }

    fn handle(&self, req: &ApiRequest) -> Reply {
        (self.f)(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackSession;
    use crate::config::PlayerConfig;
    use crate::session::{ManualDiscovery, ReactiveConfig};
    use std::sync::Arc;

    struct Hello;

    impl SessionHandler for Hello {
        fn handle(&self, _req: &ApiRequest, session: &SessionRef) -> Reply {
            ApiResponse::text(StatusCode::OK, session.device_name()).into()
        }
    }

    struct Volume;

    impl PlayerHandler for Volume {
        fn route(&self) -> RouteSpec {
            RouteSpec::get("/volume")
        }

        fn handle(&self, _req: &ApiRequest, _session: &SessionRef, player: &PlayerRef) -> Reply {
            ApiResponse::text(StatusCode::OK, player.state().volume.to_string()).into()
        }
    }

    fn status(reply: Reply) -> StatusCode {
        match reply {
            Reply::Response(r) => r.status(),
            other => panic!("expected a response, got {other:?}"),
        }
    }

    fn req() -> ApiRequest {
        ApiRequest::new(Method::GET, "/")
    }

    #[test]
    fn test_default_route_is_get_root() {
        let handler = with_session(
            SessionWrapper::from_discovery(&ManualDiscovery::new(), ReactiveConfig::silent()),
            Hello,
        );
        assert_eq!(handler.route(), RouteSpec::new("GET", "/"));
    }

    #[test]
    fn test_session_states() {
        let discovery = ManualDiscovery::new();
        let sessions = SessionWrapper::from_discovery(&discovery, ReactiveConfig::silent());
        let handler = with_session(sessions, Hello);

        assert_eq!(status(handler.handle(&req())), StatusCode::NO_CONTENT);

        let session = LoopbackSession::new("kitchen");
        discovery.announce(Arc::clone(&session) as SessionRef);
        match handler.handle(&req()) {
            Reply::Response(r) => {
                assert_eq!(r.status(), StatusCode::OK);
                assert_eq!(r.body(), b"kitchen");
            }
            other => panic!("unexpected {other:?}"),
        }

        session.set_reconnecting(true);
        match handler.handle(&req()) {
            Reply::Response(r) => {
                assert_eq!(r.status(), StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(r.header("retry-after"), Some("10"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_player_states() {
        let session = LoopbackSession::new("kitchen");
        let players = PlayerWrapper::from_parts(
            Arc::clone(&session) as SessionRef,
            crate::loopback::LoopbackPlayer::new(&PlayerConfig::default()),
            ReactiveConfig::silent(),
        );
        let handler = with_player(players.clone(), Volume);
        assert_eq!(handler.route().path, "/volume");
        assert_eq!(status(handler.handle(&req())), StatusCode::OK);

        players.clear();
        assert_eq!(status(handler.handle(&req())), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_session_without_player_is_no_content() {
        // Built around a live pair, so a replacement session gets no engine.
        let players = PlayerWrapper::from_parts(
            LoopbackSession::new("first"),
            crate::loopback::LoopbackPlayer::new(&PlayerConfig::default()),
            ReactiveConfig::silent(),
        );
        players.set(LoopbackSession::new("second"));
        assert!(players.session().is_some());
        assert!(players.player().is_none());

        let handler = with_player(players, Volume);
        assert_eq!(status(handler.handle(&req())), StatusCode::NO_CONTENT);
    }
}

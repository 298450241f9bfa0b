//! Session and player guards seen through the server: every unusable state
//! maps to its status code before a handler runs.

use connect_api::api::{self, ApiContext};
use connect_api::config::PlayerConfig;
use connect_api::handler::{check_session, with_session, Reply, SessionHandler};
use connect_api::loopback::LoopbackPlayer;
use connect_api::server::{ApiRequest, ApiResponse, HttpServer};
use connect_api::session::{PlayerWrapper, ReactiveConfig, SessionRef, SessionWrapper};
use http::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mod common;
use common::doubles::ScriptedSession;
use common::http::{get, post};

fn serve(players: &PlayerWrapper) -> HttpServer {
    let mut server = HttpServer::new();
    let ctx = ApiContext::new(players.clone(), server.metrics());
    api::register(&mut server, &ctx).unwrap();
    server.start("127.0.0.1", 0).unwrap();
    server
}

#[test]
fn test_session_invalid_at_final_check_is_internal_error() {
    // Valid when fetched, invalid at the final check, valid afterwards.
    let session = ScriptedSession::new("flaky", &[true, false, true]);
    let players = PlayerWrapper::from_parts(
        Arc::clone(&session) as SessionRef,
        LoopbackPlayer::new(&PlayerConfig::default()),
        ReactiveConfig::silent(),
    );
    let server = serve(&players);
    let addr = server.local_addr().unwrap();

    let res = get(&addr, "/");
    assert_eq!(res.status, 500);
    assert_eq!(res.body, "Session is invalid");

    let res = get(&addr, "/");
    assert_eq!(res.status, 200);
}

#[test]
fn test_invalid_session_is_cleared_lazily() {
    let session = ScriptedSession::new("gone", &[false]);
    let players = PlayerWrapper::from_parts(
        Arc::clone(&session) as SessionRef,
        LoopbackPlayer::new(&PlayerConfig::default()),
        ReactiveConfig::silent(),
    );
    let server = serve(&players);
    let addr = server.local_addr().unwrap();

    assert_eq!(post(&addr, "/player/play").status, 204);
    assert!(players.player().is_none());
    assert_eq!(session.closes.load(Ordering::SeqCst), 1);
    assert_eq!(get(&addr, "/").status, 204);
}

#[test]
fn test_player_route_without_engine() {
    let players = PlayerWrapper::from_parts(
        ScriptedSession::new("first", &[true]),
        LoopbackPlayer::new(&PlayerConfig::default()),
        ReactiveConfig::silent(),
    );
    // No factory: the replacement session gets no engine.
    players.set(ScriptedSession::new("second", &[true]));
    let server = serve(&players);
    let addr = server.local_addr().unwrap();

    assert_eq!(get(&addr, "/").status, 200);
    assert_eq!(post(&addr, "/player/current").status, 204);
}

struct Counting {
    calls: Arc<AtomicUsize>,
}

impl SessionHandler for Counting {
    fn handle(&self, _req: &ApiRequest, session: &SessionRef) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ApiResponse::text(StatusCode::OK, session.device_name()).into()
    }
}

#[test]
fn test_guard_short_circuits_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let sessions = SessionWrapper::from_session(
        ScriptedSession::new("den", &[true, true, false]),
        ReactiveConfig::silent(),
    );
    let mut server = HttpServer::new();
    server
        .register_handler(with_session(
            sessions.clone(),
            Counting {
                calls: Arc::clone(&calls),
            },
        ))
        .unwrap();
    let addr = server.start("127.0.0.1", 0).unwrap();

    assert_eq!(get(&addr, "/").body, "den");
    assert_eq!(get(&addr, "/").status, 204);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(check_session(&sessions).is_err());
}

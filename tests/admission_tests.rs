//! Admission control: the connection limit bounds live connection threads,
//! and capacity freed by a finishing connection admits the next one.

use connect_api::handler::{from_fn, RouteSpec};
use connect_api::server::{ApiResponse, HttpServer};
use http::StatusCode;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mod common;
use common::http::{get, parse_response, send_request};

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_third_connection_waits_for_capacity() {
    let mut server = HttpServer::new();
    server
        .set_max_connections(2)
        .register_handler(from_fn(RouteSpec::get("/ping"), |_| {
            ApiResponse::text(StatusCode::OK, "pong").into()
        }))
        .unwrap();
    let addr = server.start("127.0.0.1", 0).unwrap();

    // Two idle connections fill the roster.
    let first = TcpStream::connect(addr).unwrap();
    let _second = TcpStream::connect(addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || server.active_connections() == 2));

    // The third is accepted by the kernel but not by the server yet.
    let third = thread::spawn(move || send_request(&addr, "GET /ping HTTP/1.1\r\n\r\n"));
    thread::sleep(Duration::from_millis(100));
    assert!(!third.is_finished());
    assert!(server.active_connections() <= 2);

    // Closing an idle connection frees a slot.
    drop(first);
    let res = parse_response(&third.join().unwrap());
    assert_eq!(res.status, 200);
    assert_eq!(res.body, "pong");
    assert!(server.active_connections() <= 2);
    server.stop();
}

#[test]
fn test_concurrent_handlers_never_exceed_limit() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut server = HttpServer::new();
    {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        server
            .set_max_connections(3)
            .register_handler(from_fn(RouteSpec::get("/slow"), move |_| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                ApiResponse::no_content().into()
            }))
            .unwrap();
    }
    let addr = server.start("127.0.0.1", 0).unwrap();

    let clients: Vec<_> = (0..12)
        .map(|_| thread::spawn(move || get(&addr, "/slow").status))
        .collect();
    for client in clients {
        assert_eq!(client.join().unwrap(), 204);
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(server.metrics().connections_peak() <= 3);
    assert!(wait_until(Duration::from_secs(2), || server.active_connections() == 0));
}

#[test]
fn test_limit_can_be_raised_while_running() {
    let mut server = HttpServer::new();
    server.set_max_connections(1);
    let addr = server.start("127.0.0.1", 0).unwrap();

    let _held = TcpStream::connect(addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || server.active_connections() == 1));

    let waiting = thread::spawn(move || send_request(&addr, "GET /nothing HTTP/1.1\r\n\r\n"));
    thread::sleep(Duration::from_millis(50));
    assert!(!waiting.is_finished());

    server.set_max_connections(2);
    let res = parse_response(&waiting.join().unwrap());
    assert_eq!(res.status, 404);
}

#[test]
fn test_stop_releases_blocked_acceptor() {
    let mut server = HttpServer::new();
    server
        .set_max_connections(1)
        .set_join_timeout(Duration::from_millis(100));
    let addr = server.start("127.0.0.1", 0).unwrap();
    let _held = TcpStream::connect(addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || server.active_connections() == 1));

    let started = Instant::now();
    server.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!server.is_running());
}

//! `/events` over a real websocket client.

use serde_json::Value;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::WebSocket;

mod common;
use common::fixture::TestServer;
use common::http::{parse_response, post, send_request};

type Client = WebSocket<MaybeTlsStream<TcpStream>>;

fn subscribe(server: &TestServer) -> Client {
    let url = format!("ws://{}/events", server.addr());
    let (socket, response) = tungstenite::connect(url).unwrap();
    assert_eq!(response.status().as_u16(), 101);
    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
    }

    // The subscription lands on the connection thread right after the 101.
    let relay = server.relay.as_ref().unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while relay.subscriber_count() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(relay.subscriber_count(), 1);
    socket
}

fn next_event(socket: &mut Client) -> Value {
    let message = socket.read().unwrap();
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

#[test]
fn test_session_and_playback_events() {
    let server = TestServer::new();
    let mut socket = subscribe(&server);

    let session = server.announce("kitchen");
    let event = next_event(&mut socket);
    assert_eq!(event["event"], "sessionChanged");
    assert_eq!(event["username"], "loopback");

    assert_eq!(post(&server.addr(), "/player/load?uri=track%3Aone").status, 200);
    let event = next_event(&mut socket);
    assert_eq!(event["event"], "trackChanged");
    assert_eq!(event["uri"], "track:one");
    assert_eq!(next_event(&mut socket)["event"], "playbackResumed");

    post(&server.addr(), "/player/set-volume?volume=65536");
    let event = next_event(&mut socket);
    assert_eq!(event["event"], "volumeChanged");
    assert_eq!(event["value"], 1.0);

    session.set_reconnecting(true);
    assert_eq!(next_event(&mut socket)["event"], "connectionDropped");
    session.set_reconnecting(false);
    assert_eq!(next_event(&mut socket)["event"], "connectionEstablished");

    assert_eq!(post(&server.addr(), "/instance/close").status, 204);
    assert_eq!(next_event(&mut socket)["event"], "sessionCleared");
}

#[test]
fn test_closed_subscriber_is_dropped() {
    let server = TestServer::new();
    let socket = subscribe(&server);
    drop(socket);

    let relay = server.relay.as_ref().unwrap();
    // A write to a peer that went away fails within a couple of attempts.
    let deadline = Instant::now() + Duration::from_secs(2);
    while relay.subscriber_count() > 0 && Instant::now() < deadline {
        server.announce("kitchen");
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(relay.subscriber_count(), 0);
}

#[test]
fn test_plain_request_to_events_is_rejected() {
    let server = TestServer::new();
    let res = parse_response(&send_request(
        &server.addr(),
        "GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n",
    ));
    assert_eq!(res.status, 400);
    assert_eq!(res.body, "Missing Upgrade header");

    let res = parse_response(&send_request(
        &server.addr(),
        "GET /events HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\r\n",
    ));
    assert_eq!(res.status, 400);
    assert_eq!(res.body, "Missing Sec-WebSocket-Key header");
}

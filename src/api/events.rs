use http::header::{HeaderValue, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use http::StatusCode;
use std::sync::Arc;
use tracing::{debug, info};
use tungstenite::handshake::derive_accept_key;
use tungstenite::protocol::{Role, WebSocket};

use crate::events::EventRelay;
use crate::handler::{Handler, Reply, RouteSpec, Upgrade};
use crate::server::{ApiRequest, ApiResponse};

/// `GET /events`: switch the connection to a websocket and subscribe it to
/// the relay. The socket only ever receives; inbound frames are ignored.
pub struct EventsUpgrade {
    relay: Arc<EventRelay>,
}

impl EventsUpgrade {
    #[must_use]
    pub fn new(relay: Arc<EventRelay>) -> Self {
        Self { relay }
    }
}

fn bad_request(reason: &str) -> Reply {
    ApiResponse::text(StatusCode::BAD_REQUEST, reason).into()
}

impl Handler for EventsUpgrade {
    fn route(&self) -> RouteSpec {
        RouteSpec::get("/events")
    }

    fn handle(&self, req: &ApiRequest) -> Reply {
        match req.header(UPGRADE.as_str()) {
            None => return bad_request("Missing Upgrade header"),
            Some(v) if !v.eq_ignore_ascii_case("websocket") => {
                return bad_request(&format!("Unsupported upgrade: {v}"))
            }
            Some(_) => {}
        }
        let Some(key) = req.header(SEC_WEBSOCKET_KEY.as_str()) else {
            return bad_request("Missing Sec-WebSocket-Key header");
        };
        let accept = derive_accept_key(key.as_bytes());
        let Ok(accept) = HeaderValue::from_str(&accept) else {
            return bad_request("Invalid Sec-WebSocket-Key header");
        };
        debug!(connection_id = %req.connection_id, "Accepting event stream");

        let response = ApiResponse::new(StatusCode::SWITCHING_PROTOCOLS)
            .with_header(UPGRADE, HeaderValue::from_static("websocket"))
            .with_header(CONNECTION, HeaderValue::from_static("Upgrade"))
            .with_header(SEC_WEBSOCKET_ACCEPT, accept);
        let relay = Arc::clone(&self.relay);
        Reply::Upgrade(Upgrade {
            response,
            on_upgrade: Box::new(move |stream, id| {
                let socket = WebSocket::from_raw_socket(stream, Role::Server, None);
                relay.subscribe(id, socket);
                info!(connection_id = %id, "Event stream handed to relay");
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderName;
    use http::Method;

    fn request(headers: &[(HeaderName, &'static str)]) -> ApiRequest {
        let mut req = ApiRequest::new(Method::GET, "/events");
        for (name, value) in headers {
            req.headers.insert(name.clone(), HeaderValue::from_static(value));
        }
        req
    }

    fn rejection(reply: Reply) -> String {
        match reply {
            Reply::Response(r) => {
                assert_eq!(r.status(), StatusCode::BAD_REQUEST);
                String::from_utf8(r.body().to_vec()).unwrap()
            }
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_handshake_rejections() {
        let handler = EventsUpgrade::new(Arc::new(EventRelay::new()));
        assert_eq!(rejection(handler.handle(&request(&[]))), "Missing Upgrade header");
        assert_eq!(
            rejection(handler.handle(&request(&[(UPGRADE, "h2c")]))),
            "Unsupported upgrade: h2c"
        );
        assert_eq!(
            rejection(handler.handle(&request(&[(UPGRADE, "websocket")]))),
            "Missing Sec-WebSocket-Key header"
        );
    }

    #[test]
    fn test_handshake_accept_key() {
        let handler = EventsUpgrade::new(Arc::new(EventRelay::new()));
        let reply = handler.handle(&request(&[
            (UPGRADE, "WebSocket"),
            (SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ=="),
        ]));
        match reply {
            Reply::Upgrade(u) => {
                assert_eq!(u.response.status(), StatusCode::SWITCHING_PROTOCOLS);
                assert_eq!(
                    u.response.header("sec-websocket-accept"),
                    Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
                );
            }
            other => panic!("expected an upgrade, got {other:?}"),
        }
    }
}

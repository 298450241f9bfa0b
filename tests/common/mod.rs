#![allow(dead_code)]

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// A response read off the wire up to EOF.
    #[derive(Debug)]
    pub struct RawResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl RawResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn json(&self) -> serde_json::Value {
            serde_json::from_str(&self.body).unwrap()
        }
    }

    /// Send raw request bytes and read until the server closes.
    pub fn send_request(addr: &SocketAddr, req: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(req.as_bytes()).unwrap();
        let mut buf = Vec::new();
        match stream.read_to_end(&mut buf) {
            Ok(_) => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => panic!("read error: {e:?}"),
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn parse_response(raw: &str) -> RawResponse {
        let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
            .collect();
        RawResponse {
            status,
            headers,
            body: body.to_string(),
        }
    }

    pub fn request(addr: &SocketAddr, method: &str, target: &str) -> RawResponse {
        parse_response(&send_request(
            addr,
            &format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\n\r\n"),
        ))
    }

    pub fn get(addr: &SocketAddr, target: &str) -> RawResponse {
        request(addr, "GET", target)
    }

    pub fn post(addr: &SocketAddr, target: &str) -> RawResponse {
        request(addr, "POST", target)
    }
}

pub mod fixture {
    use connect_api::api::{self, ApiContext};
    use connect_api::config::PlayerConfig;
    use connect_api::events::EventRelay;
    use connect_api::loopback::{LoopbackPlayerFactory, LoopbackSession};
    use connect_api::server::HttpServer;
    use connect_api::session::{ManualDiscovery, PlayerWrapper, ReactiveConfig, SessionRef};
    use std::net::SocketAddr;
    use std::sync::Arc;

    /// A running API server over a manual discovery source and loopback
    /// engines. Stops the server on drop.
    pub struct TestServer {
        pub server: HttpServer,
        pub discovery: ManualDiscovery,
        pub players: PlayerWrapper,
        pub factory: Arc<LoopbackPlayerFactory>,
        pub relay: Option<Arc<EventRelay>>,
        addr: SocketAddr,
    }

    pub struct Options {
        pub relay: bool,
        pub cors_origin: Option<&'static str>,
        pub max_connections: usize,
        pub player: PlayerConfig,
    }

    impl Default for Options {
        fn default() -> Self {
            Self {
                relay: true,
                cors_origin: None,
                max_connections: 16,
                player: PlayerConfig::default(),
            }
        }
    }

    impl TestServer {
        pub fn new() -> Self {
            Self::with_options(Options::default())
        }

        pub fn with_options(options: Options) -> Self {
            let relay = options.relay.then(|| Arc::new(EventRelay::new()));
            let reactive = match &relay {
                Some(r) => ReactiveConfig::relaying(Arc::clone(r)),
                None => ReactiveConfig::silent(),
            };
            let discovery = ManualDiscovery::new();
            let factory = Arc::new(LoopbackPlayerFactory::new());
            let players = PlayerWrapper::from_discovery(
                &discovery,
                reactive,
                Arc::clone(&factory) as _,
                options.player,
            );

            let mut server = HttpServer::new();
            server.set_max_connections(options.max_connections);
            if let Some(origin) = options.cors_origin {
                server.enable_cors(origin);
            }
            let ctx = ApiContext::new(players.clone(), server.metrics()).with_name("test");
            api::register(&mut server, &ctx).unwrap();
            let addr = server.start("127.0.0.1", 0).unwrap();
            server.wait_ready().unwrap();

            Self {
                server,
                discovery,
                players,
                factory,
                relay,
                addr,
            }
        }

        pub fn addr(&self) -> SocketAddr {
            self.addr
        }

        /// Announce a fresh loopback session and return it.
        pub fn announce(&self, name: &str) -> Arc<LoopbackSession> {
            let session = LoopbackSession::new(name);
            assert!(self.discovery.announce(Arc::clone(&session) as SessionRef));
            session
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.server.stop();
        }
    }
}

pub mod doubles {
    use connect_api::session::{
        CloseListener, ReconnectionListener, Session, SessionListener, SessionRef,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Session whose `is_valid` answers follow a script; once the script runs
    /// out it keeps giving the last answer.
    pub struct ScriptedSession {
        name: String,
        validity: Mutex<VecDeque<bool>>,
        last: AtomicBool,
        pub closes: AtomicUsize,
        close_listener: Mutex<Option<CloseListener>>,
    }

    impl ScriptedSession {
        pub fn new(name: &str, script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                validity: Mutex::new(script.iter().copied().collect()),
                last: AtomicBool::new(script.last().copied().unwrap_or(true)),
                closes: AtomicUsize::new(0),
                close_listener: Mutex::new(None),
            })
        }
    }

    impl Session for ScriptedSession {
        fn is_valid(&self) -> bool {
            match self.validity.lock().unwrap().pop_front() {
                Some(v) => v,
                None => self.last.load(Ordering::SeqCst),
            }
        }

        fn is_reconnecting(&self) -> bool {
            false
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            let listener = self.close_listener.lock().unwrap().take();
            if let Some(listener) = listener {
                listener();
            }
        }

        fn set_close_listener(&self, listener: Option<CloseListener>) {
            *self.close_listener.lock().unwrap() = listener;
        }

        fn set_reconnection_listener(&self, _listener: Option<Arc<dyn ReconnectionListener>>) {}

        fn device_id(&self) -> String {
            format!("id-{}", self.name)
        }

        fn device_name(&self) -> String {
            self.name.clone()
        }

        fn username(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Records listener callbacks as `"new:<name>"` / `"cleared:<name>"`.
    #[derive(Default)]
    pub struct RecordingListener {
        pub calls: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SessionListener for RecordingListener {
        fn on_session_cleared(&self, session: &SessionRef) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("cleared:{}", session.device_name()));
        }

        fn on_new_session(&self, session: &SessionRef) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("new:{}", session.device_name()));
        }
    }
}

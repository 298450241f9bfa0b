//! The HTTP server: listener, accept loop, per-connection workers, dispatch.
//!
//! Lifecycle is **Stopped → Running → Stopped**. [`HttpServer::start`] binds
//! and returns once the accept loop is spawned. [`HttpServer::stop`] flips the
//! running flag, wakes the accept loop, then joins connection threads and the
//! accept thread, each against a bounded timeout.

use http::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN};
use http::StatusCode;
use std::any::Any;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::admission::{join_with_timeout, Admission};
use super::request::{parse_request, ApiRequest, ParseError};
use super::response::ApiResponse;
use crate::error::{RouteError, ServerError};
use crate::handler::{Handler, Reply, Upgrade};
use crate::ids::ConnectionId;
use crate::metrics::ServerMetrics;
use crate::router::{Route, RouteTable};

/// Default bound on each join during [`HttpServer::stop`].
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Default connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Back-off after a failed `accept` so descriptor exhaustion does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);
const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
const SHUTDOWN_WRITE_TIMEOUT: Duration = Duration::from_millis(250);

/// State shared between the accept loop and every connection thread.
struct Shared {
    running: AtomicBool,
    admission: Admission,
    routes: RouteTable,
    cors_origin: Option<HeaderValue>,
    read_timeout: Option<Duration>,
    metrics: Arc<ServerMetrics>,
}

struct Running {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

/// Admission-controlled HTTP/1.1 server with multi-dispatch routing.
///
/// Configure with the `&mut self` builder methods, then [`start`](Self::start).
/// The route table is copied at start; registering afterwards only affects the
/// next start.
pub struct HttpServer {
    routes: RouteTable,
    cors_origin: Option<String>,
    max_connections: usize,
    join_timeout: Duration,
    read_timeout: Option<Duration>,
    metrics: Arc<ServerMetrics>,
    state: Mutex<Option<Running>>,
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpServer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: RouteTable::new(),
            cors_origin: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            read_timeout: None,
            metrics: Arc::new(ServerMetrics::new()),
            state: Mutex::new(None),
        }
    }

    /// Register `handler` under the route it declares.
    ///
    /// # Errors
    ///
    /// Returns a [`RouteError`] if the declared method pattern or template does
    /// not compile.
    pub fn register_handler<H: Handler + 'static>(
        &mut self,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        self.register_shared(Arc::new(handler))
    }

    /// Register an already shared handler under the route it declares.
    ///
    /// # Errors
    ///
    /// As [`register_handler`](Self::register_handler).
    pub fn register_shared(&mut self, handler: Arc<dyn Handler>) -> Result<&mut Self, RouteError> {
        let declared = handler.route();
        self.register_route(&declared.method, &declared.path, handler)
    }

    /// Register several handlers in order.
    ///
    /// # Errors
    ///
    /// Stops at the first handler whose route fails to compile; the ones
    /// before it stay registered.
    pub fn register_handlers<I>(&mut self, handlers: I) -> Result<&mut Self, RouteError>
    where
        I: IntoIterator<Item = Arc<dyn Handler>>,
    {
        for handler in handlers {
            self.register_shared(handler)?;
        }
        Ok(self)
    }

    /// Register `handler` under an explicit method pattern and template,
    /// ignoring the route the handler declares.
    ///
    /// # Errors
    ///
    /// As [`register_handler`](Self::register_handler).
    pub fn register_route(
        &mut self,
        method: &str,
        template: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, RouteError> {
        self.routes.push(Route::new(method, template, handler)?);
        Ok(self)
    }

    /// Attach `Access-Control-Allow-Origin: origin` to every matched response.
    pub fn enable_cors(&mut self, origin: impl Into<String>) -> &mut Self {
        self.cors_origin = Some(origin.into());
        self
    }

    pub fn disable_cors(&mut self) -> &mut Self {
        self.cors_origin = None;
        self
    }

    /// Bound on concurrently handled connections; `0` is treated as `1`.
    ///
    /// Applies immediately to a running server.
    pub fn set_max_connections(&mut self, max: usize) -> &mut Self {
        self.max_connections = max.max(1);
        if let Some(running) = self.lock_state().as_ref() {
            running.shared.admission.set_limit(self.max_connections);
        }
        self
    }

    pub fn set_join_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.join_timeout = timeout;
        self
    }

    /// Socket read timeout while a request is being received.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<Running>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `host:port` and start accepting. Returns the bound address, which
    /// differs from the requested one when `port` is `0`.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyRunning`] if the server is running.
    /// - [`ServerError::InvalidCorsOrigin`] if the CORS origin is not a valid
    ///   header value.
    /// - [`ServerError::Bind`] if the address cannot be bound.
    /// - [`ServerError::Spawn`] if the accept thread cannot be spawned.
    pub fn start(&self, host: &str, port: u16) -> Result<SocketAddr, ServerError> {
        let mut state = self.lock_state();
        if let Some(running) = state.as_ref() {
            return Err(ServerError::AlreadyRunning(running.addr));
        }

        let cors_origin = self
            .cors_origin
            .as_deref()
            .map(|o| {
                HeaderValue::from_str(o)
                    .map_err(|_| ServerError::InvalidCorsOrigin(o.to_string()))
            })
            .transpose()?;

        let bind_error = |source: io::Error| ServerError::Bind {
            addr: format!("{host}:{port}"),
            source,
        };
        let listener = TcpListener::bind((host, port)).map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            admission: Admission::new(self.max_connections),
            routes: self.routes.clone(),
            cors_origin,
            read_timeout: self.read_timeout,
            metrics: Arc::clone(&self.metrics),
        });

        let accept_shared = Arc::clone(&shared);
        let accept = thread::Builder::new()
            .name("connect-api-accept".to_string())
            .spawn(move || accept_loop(&listener, &accept_shared))
            .map_err(ServerError::Spawn)?;

        info!(
            addr = %addr,
            routes = self.routes.len(),
            max_connections = self.max_connections,
            cors = self.cors_origin.is_some(),
            "HTTP server started"
        );
        *state = Some(Running {
            addr,
            shared,
            accept,
        });
        Ok(addr)
    }

    /// Stop accepting, then join connection threads and the accept thread.
    ///
    /// Best effort: threads that overrun the join timeout are left running and
    /// reported. Requests read after this point are answered `503`. Calling
    /// `stop` on a stopped server does nothing.
    pub fn stop(&self) {
        let Some(running) = self.lock_state().take() else {
            return;
        };
        info!(addr = %running.addr, "Stopping HTTP server");

        running.shared.running.store(false, Ordering::SeqCst);
        running.shared.admission.wake_all();
        // The accept loop is blocked in accept(); a throwaway connection wakes it.
        if let Err(e) = TcpStream::connect_timeout(&wake_addr(running.addr), WAKE_CONNECT_TIMEOUT) {
            debug!(error = %e, "Wake-up connection failed; accept loop may already be gone");
        }

        let stragglers = running.shared.admission.drain(self.join_timeout);
        let accept_joined = join_with_timeout(running.accept, self.join_timeout);
        if !accept_joined {
            warn!(addr = %running.addr, "Accept loop did not exit before timeout");
        }
        info!(
            addr = %running.addr,
            stragglers,
            accept_joined,
            "HTTP server stopped"
        );
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_state().is_some()
    }

    /// Bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_state().as_ref().map(|r| r.addr)
    }

    /// Connections currently counted against the limit.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.lock_state()
            .as_ref()
            .map_or(0, |r| r.shared.admission.active())
    }

    /// Wait until the listener accepts TCP connections.
    ///
    /// Polls every 5 ms for about 250 ms.
    ///
    /// # Errors
    ///
    /// `NotConnected` if the server is not running, `TimedOut` if it never
    /// became reachable.
    pub fn wait_ready(&self) -> io::Result<()> {
        let addr = self
            .local_addr()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "server not running"))?;
        for _ in 0..50 {
            if TcpStream::connect(wake_addr(addr)).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Address to connect to for reaching a listener bound to `addr`.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port())
        }
        _ => addr,
    }
}

fn accept_loop(listener: &TcpListener, shared: &Arc<Shared>) {
    loop {
        if !shared.admission.wait_for_capacity(&shared.running) {
            break;
        }
        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %e, "Accept failed");
                thread::sleep(ACCEPT_ERROR_BACKOFF);
                continue;
            }
        };
        if !shared.running.load(Ordering::SeqCst) {
            debug!(peer = %peer, "Accept loop woken for shutdown");
            reject_during_shutdown(stream);
            break;
        }

        let id = ConnectionId::new();
        shared.metrics.connection_opened();
        let worker_shared = Arc::clone(shared);
        let admitted = shared.admission.admit(id, move |done| {
            thread::Builder::new()
                .name("connect-api-conn".to_string())
                .spawn(move || {
                    let _exit = WorkerExit {
                        shared: Arc::clone(&worker_shared),
                        done,
                    };
                    handle_connection(&worker_shared, stream, peer, id);
                })
        });
        match admitted {
            Ok(active) => debug!(connection_id = %id, peer = %peer, active, "Connection admitted"),
            Err(e) => {
                shared.metrics.connection_closed();
                error!(connection_id = %id, error = %e, "Failed to spawn connection thread");
            }
        }
    }
    info!("Accept loop exited");
}

/// Answer a connection accepted after `stop` began. The wake-up connection
/// from `stop` lands here too and simply discards the reply.
fn reject_during_shutdown(mut stream: TcpStream) {
    if let Err(e) = stream.set_write_timeout(Some(SHUTDOWN_WRITE_TIMEOUT)) {
        debug!(error = %e, "Failed to set write timeout on rejected connection");
    }
    let response = ApiResponse::text(StatusCode::SERVICE_UNAVAILABLE, "Server was shut down");
    if let Err(e) = response.write_to(&mut stream) {
        debug!(error = %e, "Shutdown rejection not delivered");
    }
}

/// Marks a worker done and reaps the roster when its thread leaves, panics
/// included.
struct WorkerExit {
    shared: Arc<Shared>,
    done: Arc<AtomicBool>,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        self.shared.metrics.connection_closed();
        self.done.store(true, Ordering::Release);
        let reaped = self.shared.admission.reap();
        if reaped > 0 {
            debug!(reaped, "Reaped finished connections");
        }
    }
}

fn handle_connection(shared: &Shared, mut stream: TcpStream, peer: SocketAddr, id: ConnectionId) {
    if let Err(e) = stream.set_read_timeout(shared.read_timeout) {
        warn!(connection_id = %id, error = %e, "Failed to set read timeout");
    }

    let req = match parse_request(&mut stream, id, Some(peer)) {
        Ok(req) => req,
        Err(ParseError::Closed) => {
            debug!(connection_id = %id, "Connection closed without a request");
            return;
        }
        Err(e) => {
            warn!(connection_id = %id, peer = %peer, error = %e, "Rejecting unparseable request");
            let status = match e {
                ParseError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                ParseError::HeadersTooLarge | ParseError::TooManyHeaders => {
                    StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
                }
                _ => StatusCode::BAD_REQUEST,
            };
            let reason = status.canonical_reason().unwrap_or("Bad Request");
            write_response(&mut stream, id, &ApiResponse::text(status, reason));
            return;
        }
    };

    if !shared.running.load(Ordering::SeqCst) {
        shared.metrics.shutdown_rejected();
        write_response(
            &mut stream,
            id,
            &ApiResponse::text(StatusCode::SERVICE_UNAVAILABLE, "Server was shut down"),
        );
        return;
    }

    dispatch(shared, req, stream);
}

/// Run every matching route in registration order. If none of them wrote a
/// response, answer `404`.
fn dispatch(shared: &Shared, mut req: ApiRequest, mut stream: TcpStream) {
    let started = Instant::now();
    let id = req.connection_id;
    let method = req.method.clone();
    let path = req.path.clone();
    let mut matched = 0usize;
    let mut written = false;

    for (route, params) in shared.routes.matching(&method, &path) {
        matched += 1;
        req.params = params;

        let reply = match catch_unwind(AssertUnwindSafe(|| route.handler.handle(&req))) {
            Ok(reply) => reply,
            Err(panic) => {
                shared.metrics.handler_panicked();
                error!(
                    connection_id = %id,
                    method = %method,
                    path = %path,
                    template = %route.template.as_str(),
                    panic_message = %panic_message(panic.as_ref()),
                    "Handler panicked"
                );
                ApiResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into()
            }
        };

        match reply {
            Reply::Response(mut response) => {
                if let Some(origin) = &shared.cors_origin {
                    response.set_header(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
                }
                if !write_response(&mut stream, id, &response) {
                    break;
                }
                written = true;
            }
            Reply::Upgrade(Upgrade {
                response,
                on_upgrade,
            }) => {
                shared.metrics.request_handled(matched, started.elapsed());
                if write_response(&mut stream, id, &response) {
                    info!(connection_id = %id, path = %path, "Connection upgraded");
                    on_upgrade(stream, id);
                }
                return;
            }
            Reply::Observed => {}
        }
    }

    if !written {
        debug!(connection_id = %id, method = %method, path = %path, matched, "No route responded");
        write_response(
            &mut stream,
            id,
            &ApiResponse::text(StatusCode::NOT_FOUND, "Not Found"),
        );
    }

    let elapsed = started.elapsed();
    shared.metrics.request_handled(if written { matched } else { 0 }, elapsed);
    info!(
        connection_id = %id,
        method = %method,
        path = %path,
        matched,
        latency_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "Request handled"
    );
}

/// Write `response`; returns whether it went out.
fn write_response(stream: &mut TcpStream, id: ConnectionId, response: &ApiResponse) -> bool {
    match response.write_to(stream) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                connection_id = %id,
                status = response.status().as_u16(),
                error = %e,
                "Failed to write response"
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

//! # connect-api
//!
//! HTTP control plane for a long-lived streaming session and the playback
//! engine bound to it.
//!
//! ## Overview
//!
//! The session is created, lost, reconnected and replaced by a discovery
//! subsystem on its own threads. Requests arrive on other threads. This crate
//! keeps the two consistent: every request sees one momentarily valid
//! session/player pair, or a status code that says why there is none.
//!
//! ## Architecture
//!
//! - **[`session`]** - reactive session and player wrappers fed by a discovery source
//! - **[`handler`]** - the handler contract plus the session and player guards
//! - **[`router`]** - path templates, method patterns and the multi-dispatch route table
//! - **[`server`]** - blocking HTTP/1.1 server with admission control
//! - **[`api`]** - the concrete routes
//! - **[`events`]** - websocket relay of session and playback events
//! - **[`metrics`]** - server counters rendered as Prometheus text
//! - **[`config`]**, **[`logging`]**, **[`cli`]** - service wiring
//! - **[`loopback`]** - in-memory session and engine
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Accept as Accept loop
//!     participant Admission
//!     participant Worker as Connection thread
//!     participant Routes as RouteTable
//!     participant Guard as with_session / with_player
//!     participant Wrapper as PlayerWrapper
//!
//!     Client->>Accept: connect
//!     Accept->>Admission: wait_for_capacity()
//!     Admission-->>Accept: roster below limit
//!     Accept->>Worker: spawn + admit
//!     Worker->>Worker: parse request
//!     alt server stopped
//!         Worker-->>Client: 503 Server was shut down
//!     end
//!     Worker->>Routes: matching(method, path)
//!     loop every matching route, in registration order
//!         Routes->>Guard: handle(request)
//!         Guard->>Wrapper: session() / player()
//!         alt no session or no player
//!             Guard-->>Client: 204
//!         else reconnecting
//!             Guard-->>Client: 503 + Retry-After
//!         else usable
//!             Guard-->>Client: handler response (+ CORS)
//!         end
//!     end
//!     Worker->>Admission: reap + notify_all
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use connect_api::api::{self, ApiContext};
//! use connect_api::loopback::{LoopbackPlayerFactory, LoopbackSession};
//! use connect_api::config::PlayerConfig;
//! use connect_api::server::HttpServer;
//! use connect_api::session::{ManualDiscovery, PlayerWrapper, ReactiveConfig};
//! use std::sync::Arc;
//!
//! let discovery = ManualDiscovery::new();
//! let players = PlayerWrapper::from_discovery(
//!     &discovery,
//!     ReactiveConfig::silent(),
//!     Arc::new(LoopbackPlayerFactory::new()),
//!     PlayerConfig::default(),
//! );
//!
//! let mut server = HttpServer::new();
//! let ctx = ApiContext::new(players, server.metrics());
//! api::register(&mut server, &ctx)?;
//! let addr = server.start("127.0.0.1", 0)?;
//!
//! discovery.announce(LoopbackSession::new("kitchen"));
//! println!("listening on {addr}");
//! server.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod ids;
pub mod logging;
pub mod loopback;
pub mod metrics;
pub mod router;
pub mod server;
pub mod session;

pub use error::{RouteError, ServerError};
pub use handler::{Handler, PlayerHandler, Reply, RouteSpec, SessionHandler};
pub use server::{ApiRequest, ApiResponse, HttpServer};
pub use session::{PlayerWrapper, SessionWrapper};

//! # Server Module
//!
//! Blocking HTTP/1.1 server: one accept thread, one thread per connection,
//! a bounded roster of live connections, and multi-dispatch over the route
//! table. One request per connection; every response closes it.

mod admission;
pub mod http_server;
pub mod request;
pub mod response;

pub use http_server::{HttpServer, DEFAULT_JOIN_TIMEOUT, DEFAULT_MAX_CONNECTIONS};
pub use request::{parse_query_params, parse_request, ApiRequest, ParseError};
pub use response::ApiResponse;

//! Error types for route registration and server lifecycle.
//!
//! Session or player absence is never an error here: an unbound wrapper is the
//! normal state between sessions and is answered with a status code by the
//! handler decorators, not with one of these variants.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while compiling a route (template or method pattern).
#[derive(Debug, Error)]
pub enum RouteError {
    /// The template was empty or otherwise unusable.
    #[error("invalid path template '{template}': {reason}")]
    InvalidTemplate {
        /// The offending template
        template: String,
        /// Short description of what is wrong with it
        reason: &'static str,
    },
    /// The same `{name}` placeholder appears more than once in one template.
    #[error("path template '{template}' declares parameter '{name}' more than once")]
    DuplicateParameter {
        /// The offending template
        template: String,
        /// The repeated placeholder name
        name: String,
    },
    /// A method pattern could not be compiled into a regex.
    #[error("invalid method pattern '{pattern}': {source}")]
    InvalidMethodPattern {
        /// The pattern as given at registration
        pattern: String,
        /// Underlying regex compile failure
        #[source]
        source: regex::Error,
    },
}

/// Errors raised by [`HttpServer`](crate::server::HttpServer) lifecycle calls.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called on a server that is already running.
    #[error("server is already running on {0}")]
    AlreadyRunning(SocketAddr),
    /// The listening socket could not be opened.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },
    /// The configured CORS origin is not a valid header value.
    #[error("invalid CORS origin '{0}'")]
    InvalidCorsOrigin(String),
    /// The accept-loop thread could not be spawned.
    #[error("failed to spawn accept loop: {0}")]
    Spawn(#[source] io::Error),
}

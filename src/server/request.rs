use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::debug;

use crate::ids::ConnectionId;
use crate::router::PathParams;

/// Upper bound on the request line plus header section.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;
/// Upper bound on the number of header lines.
pub const MAX_HEADERS: usize = 100;
/// Upper bound on a request body. Control-plane requests are tiny.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Failure to read a request off a connection.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The peer closed the connection before sending a request line.
    #[error("connection closed before a request was sent")]
    Closed,
    #[error("i/o error while reading request: {0}")]
    Io(#[from] io::Error),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("header section exceeds {MAX_HEADER_BYTES} bytes")]
    HeadersTooLarge,
    #[error("more than {MAX_HEADERS} headers")]
    TooManyHeaders,
    #[error("request body exceeds {MAX_BODY_BYTES} bytes")]
    BodyTooLarge,
}

/// A parsed HTTP/1.1 request as seen by handlers.
///
/// `params` is filled per matched route right before that route's handler
/// runs, so each handler in a multi-dispatch chain sees its own placeholders.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Id of the connection this request arrived on
    pub connection_id: ConnectionId,
    /// HTTP method
    pub method: Method,
    /// Request path without the query string
    pub path: String,
    /// Decoded query string parameters
    pub query: HashMap<String, String>,
    /// Request headers
    pub headers: HeaderMap,
    /// Raw request body
    pub body: Vec<u8>,
    /// Path parameters of the route currently being dispatched
    pub params: PathParams,
    /// Remote address, when the socket reports one
    pub peer: Option<SocketAddr>,
}

impl ApiRequest {
    /// Build a request by hand, mostly for handler unit tests.
    #[must_use]
    pub fn new(method: Method, target: &str) -> Self {
        let path = target.split('?').next().unwrap_or("/").to_string();
        Self {
            connection_id: ConnectionId::new(),
            method,
            path,
            query: parse_query_params(target),
            headers: HeaderMap::new(),
            body: Vec::new(),
            params: PathParams::new(),
            peer: None,
        }
    }

    /// Header value as a string, if present and visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Path parameter of the route being dispatched.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Named argument from the query string, falling back to an
    /// `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<String> {
        if let Some(v) = self.query.get(name) {
            return Some(v.clone());
        }
        if !self.is_form() {
            return None;
        }
        url::form_urlencoded::parse(&self.body)
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    fn is_form(&self) -> bool {
        self.header(CONTENT_TYPE.as_str())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false)
    }
}

/// Parse query string parameters from a request target.
///
/// Everything after the first `?` is form-decoded; later duplicates win.
pub fn parse_query_params(target: &str) -> HashMap<String, String> {
    match target.split_once('?') {
        Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => HashMap::new(),
    }
}

/// Read one line of the request head, never buffering more than what is left
/// of the [`MAX_HEADER_BYTES`] budget.
fn read_head_line<R: BufRead>(
    reader: &mut R,
    used: usize,
    line: &mut String,
) -> Result<usize, ParseError> {
    let budget = MAX_HEADER_BYTES.saturating_sub(used);
    let limit = u64::try_from(budget).map_or(u64::MAX, |b| b.saturating_add(1));
    let n = reader.take(limit).read_line(line)?;
    if n > budget {
        return Err(ParseError::HeadersTooLarge);
    }
    Ok(n)
}

/// Read one request from `stream`.
///
/// The reader borrows the stream only for the duration of the call so the
/// caller can write the response (or hand the socket over on upgrade) after.
pub fn parse_request<S: Read>(
    stream: &mut S,
    connection_id: ConnectionId,
    peer: Option<SocketAddr>,
) -> Result<ApiRequest, ParseError> {
    let mut reader = BufReader::new(stream);
    let mut header_bytes = 0usize;

    let mut request_line = String::new();
    let n = read_head_line(&mut reader, header_bytes, &mut request_line)?;
    if n == 0 {
        return Err(ParseError::Closed);
    }
    header_bytes += n;

    let mut parts = request_line.trim_end().splitn(3, ' ');
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(m), Some(t)) if !m.is_empty() && !t.is_empty() => (m, t),
        _ => {
            return Err(ParseError::Malformed(format!(
                "request line '{}'",
                request_line.trim_end()
            )))
        }
    };
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| ParseError::Malformed(format!("method '{method}'")))?;
    let target = target.to_string();

    let mut headers = HeaderMap::new();
    loop {
        let mut line = String::new();
        let n = read_head_line(&mut reader, header_bytes, &mut line)?;
        if n == 0 {
            return Err(ParseError::Malformed("unterminated header section".into()));
        }
        header_bytes += n;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        let (name, value) = trimmed
            .split_once(':')
            .ok_or_else(|| ParseError::Malformed(format!("header line '{trimmed}'")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| ParseError::Malformed(format!("header name '{}'", name.trim())))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| ParseError::Malformed(format!("value of header '{name}'")))?;
        headers.append(name, value);
    }

    let content_length = match headers.get(CONTENT_LENGTH) {
        Some(v) => v
            .to_str()
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| ParseError::Malformed("content-length".into()))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(ParseError::BodyTooLarge);
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body)?;
    }

    let path = target.split('?').next().unwrap_or("/").to_string();
    let query = parse_query_params(&target);

    debug!(
        connection_id = %connection_id,
        method = %method,
        path = %path,
        header_count = headers.len(),
        body_bytes = body.len(),
        "HTTP request parsed"
    );

    Ok(ApiRequest {
        connection_id,
        method,
        path,
        query,
        headers,
        body,
        params: PathParams::new(),
        peer,
    })
}

use http::header::{HeaderName, HeaderValue, CONNECTION};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::borrow::Cow;
use std::io::{self, Write};
use tracing::error;

/// A response produced by a handler and serialized onto the connection.
///
/// Defaults to `200 OK`, `text/html`, UTF-8, empty body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    body: Vec<u8>,
    content_type: Cow<'static, str>,
    encoding: Cow<'static, str>,
    headers: HeaderMap,
}

impl Default for ApiResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            body: Vec::new(),
            content_type: Cow::Borrowed("text/html"),
            encoding: Cow::Borrowed("utf-8"),
            headers: HeaderMap::new(),
        }
    }
}

impl ApiResponse {
    /// Empty response with the given status and default content type.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// `204 No Content`.
    #[must_use]
    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    /// Plain-text response with a short human readable reason.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_content_type("text/plain")
            .with_body(body.into().into_bytes())
    }

    /// JSON response. Serialization failures are logged and answered with 500.
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .with_content_type("application/json")
                .with_body(body),
            Err(e) => {
                error!(error = %e, "Failed to serialize JSON response body");
                Self::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<Cow<'static, str>>) -> Self {
        self.content_type = content_type.into();
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: impl Into<Cow<'static, str>>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Add or replace a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.set_header(name, value);
        self
    }

    /// Add or replace a header in place.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Serialize status line, headers and body.
    ///
    /// `101` and `204` responses carry no entity headers. Everything except a
    /// protocol switch is sent with `Connection: close`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("Unknown")
        );

        let bodiless =
            self.status == StatusCode::SWITCHING_PROTOCOLS || self.status == StatusCode::NO_CONTENT;
        if !bodiless {
            head.push_str(&format!(
                "Content-Type: {}; charset={}\r\nContent-Length: {}\r\n",
                self.content_type,
                self.encoding,
                self.body.len()
            ));
        }

        for (name, value) in &self.headers {
            head.push_str(name.as_str());
            head.push_str(": ");
            head.push_str(&String::from_utf8_lossy(value.as_bytes()));
            head.push_str("\r\n");
        }
        if self.status != StatusCode::SWITCHING_PROTOCOLS && !self.headers.contains_key(CONNECTION)
        {
            head.push_str("Connection: close\r\n");
        }
        head.push_str("\r\n");

        out.write_all(head.as_bytes())?;
        if !bodiless {
            out.write_all(&self.body)?;
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::RETRY_AFTER;

    fn render(res: &ApiResponse) -> String {
        let mut out = Vec::new();
        res.write_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_defaults() {
        let res = ApiResponse::default();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.content_type(), "text/html");
        let raw = render(&res);
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(raw.contains("Content-Length: 0\r\n"));
        assert!(raw.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_no_content_has_no_entity_headers() {
        let raw = render(&ApiResponse::no_content());
        assert!(raw.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!raw.contains("Content-Length"));
        assert!(raw.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_extra_headers_and_body() {
        let res = ApiResponse::text(StatusCode::SERVICE_UNAVAILABLE, "Session is reconnecting")
            .with_header(RETRY_AFTER, HeaderValue::from_static("10"));
        let raw = render(&res);
        assert!(raw.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(raw.contains("retry-after: 10\r\n"));
        assert!(raw.ends_with("\r\n\r\nSession is reconnecting"));
        assert_eq!(res.header("Retry-After"), Some("10"));
    }

    #[test]
    fn test_encoding_and_status_overrides() {
        let res = ApiResponse::default()
            .with_status(StatusCode::ACCEPTED)
            .with_content_type("text/plain")
            .with_encoding("iso-8859-1")
            .with_body("ok");
        let raw = render(&res);
        assert!(raw.starts_with("HTTP/1.1 202 Accepted\r\n"));
        assert!(raw.contains("Content-Type: text/plain; charset=iso-8859-1\r\n"));
        assert!(raw.ends_with("\r\n\r\nok"));
    }

    #[test]
    fn test_json_body() {
        let res = ApiResponse::json(StatusCode::OK, &serde_json::json!({"volume": 10}));
        assert_eq!(res.content_type(), "application/json");
        assert_eq!(res.body(), br#"{"volume":10}"#);
    }
}

//! Registration-ordered route table with multi-dispatch lookup.
//!
//! Unlike a first-match router, [`RouteTable::matching`] yields *every* route
//! whose method pattern and path template accept the request, in the order the
//! routes were registered. The table is append-only: once the server starts it
//! is shared read-only across connection threads.

use http::Method;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::template::{PathParams, PathTemplate};
use crate::error::RouteError;
use crate::handler::Handler;

/// Verb filter of a route.
#[derive(Clone)]
pub enum MethodPattern {
    /// `*`: any verb
    Any,
    /// A single verb, compared exactly
    Exact(Method),
    /// An anchored regex over the verb name, e.g. `GET|HEAD`
    Pattern(Regex),
}

impl MethodPattern {
    /// Parse a method pattern.
    ///
    /// `*` is the wildcard, a plain token is an exact verb, anything containing
    /// regex metacharacters is compiled as a pattern anchored on both ends.
    ///
    /// # Errors
    ///
    /// [`RouteError::InvalidMethodPattern`] when the pattern is neither a valid
    /// method token nor a valid regex.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let pattern = pattern.trim();
        if pattern == "*" {
            return Ok(Self::Any);
        }
        let is_token = !pattern.is_empty() && pattern.bytes().all(|b| b.is_ascii_alphabetic());
        if is_token {
            if let Ok(method) = Method::from_bytes(pattern.to_ascii_uppercase().as_bytes()) {
                return Ok(Self::Exact(method));
            }
        }
        Regex::new(&format!("^(?:{pattern})$"))
            .map(Self::Pattern)
            .map_err(|source| RouteError::InvalidMethodPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    #[must_use]
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(m) => m == method,
            Self::Pattern(re) => re.is_match(method.as_str()),
        }
    }
}

impl From<Method> for MethodPattern {
    fn from(method: Method) -> Self {
        Self::Exact(method)
    }
}

impl fmt::Display for MethodPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(m) => f.write_str(m.as_str()),
            Self::Pattern(re) => {
                let raw = re.as_str();
                let inner = raw
                    .strip_prefix("^(?:")
                    .and_then(|s| s.strip_suffix(")$"))
                    .unwrap_or(raw);
                f.write_str(inner)
            }
        }
    }
}

impl fmt::Debug for MethodPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodPattern({self})")
    }
}

/// Path side of a route. The root template `/` matches every path.
#[derive(Debug, Clone)]
pub enum RouteTemplate {
    Root,
    Template(PathTemplate),
}

impl RouteTemplate {
    /// # Errors
    ///
    /// Propagates [`PathTemplate::new`] failures.
    pub fn parse(template: &str) -> Result<Self, RouteError> {
        if template == "/" {
            Ok(Self::Root)
        } else {
            PathTemplate::new(template).map(Self::Template)
        }
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        match self {
            Self::Root => Some(PathParams::new()),
            Self::Template(t) => t.matches(path),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Root => "/",
            Self::Template(t) => t.as_str(),
        }
    }
}

/// One entry of the route table.
#[derive(Clone)]
pub struct Route {
    pub method: MethodPattern,
    pub template: RouteTemplate,
    pub handler: Arc<dyn Handler>,
}

impl Route {
    /// Build a route from its textual method pattern and template.
    ///
    /// # Errors
    ///
    /// Returns a [`RouteError`] if either side fails to compile.
    pub fn new(
        method: &str,
        template: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, RouteError> {
        Ok(Self {
            method: MethodPattern::parse(method)?,
            template: RouteTemplate::parse(template)?,
            handler,
        })
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("template", &self.template.as_str())
            .finish_non_exhaustive()
    }
}

/// Ordered collection of routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, route: Route) {
        debug!(
            method = %route.method,
            template = %route.template.as_str(),
            position = self.routes.len(),
            "Route registered"
        );
        self.routes.push(route);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// All routes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Every route accepting `method` and `path`, in registration order, with
    /// the parameters its template extracted.
    pub fn matching<'a>(
        &'a self,
        method: &'a Method,
        path: &'a str,
    ) -> impl Iterator<Item = (&'a Route, PathParams)> + 'a {
        self.routes.iter().filter_map(move |route| {
            if !route.method.matches(method) {
                return None;
            }
            route.template.matches(path).map(|params| (route, params))
        })
    }
}

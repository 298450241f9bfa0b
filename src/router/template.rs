//! Path template compilation and matching.
//!
//! A template such as `/devices/{id}/volume` is split on `/`. Segments wrapped
//! in braces with a non-empty name become capture groups; every other segment
//! must match the request path verbatim. The compiled regex is anchored at both
//! ends, so a path matches only when its segment count equals the template's.

use regex::Regex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::RouteError;

/// Maximum number of path parameters before heap allocation.
pub const MAX_INLINE_PARAMS: usize = 8;

/// Parameters extracted from a matched path.
///
/// Names are shared with the compiled template (`Arc<str>` clone is a refcount
/// bump), values are per-request substrings of the path. Names are unique:
/// [`PathTemplate::new`] rejects templates that repeat a placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>);

impl PathParams {
    /// Empty parameter set, used for the root template and literal routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a parameter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(name, value)` pairs in template order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_ref(), v.as_str()))
    }

    /// Copy into an owned map.
    ///
    /// Allocates; prefer [`get`](Self::get) on the request path.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn push(&mut self, name: Arc<str>, value: String) {
        self.0.push((name, value));
    }
}

/// A compiled path template.
#[derive(Clone)]
pub struct PathTemplate {
    template: String,
    regex: Regex,
    names: Vec<Arc<str>>,
}

impl PathTemplate {
    /// Compile a template.
    ///
    /// # Errors
    ///
    /// - [`RouteError::InvalidTemplate`] if the template is empty.
    /// - [`RouteError::DuplicateParameter`] if a placeholder name repeats.
    pub fn new(template: &str) -> Result<Self, RouteError> {
        if template.is_empty() {
            return Err(RouteError::InvalidTemplate {
                template: String::new(),
                reason: "template is empty",
            });
        }

        let mut pattern = String::with_capacity(template.len() + 8);
        pattern.push('^');
        let mut names: Vec<Arc<str>> = Vec::with_capacity(template.matches('{').count());

        for (idx, segment) in template.split('/').enumerate() {
            if idx > 0 {
                pattern.push('/');
            }
            match parameter_name(segment) {
                Some(name) => {
                    if names.iter().any(|n| n.as_ref() == name) {
                        return Err(RouteError::DuplicateParameter {
                            template: template.to_string(),
                            name: name.to_string(),
                        });
                    }
                    pattern.push_str("([^/]+)");
                    names.push(Arc::from(name));
                }
                None => pattern.push_str(&regex::escape(segment)),
            }
        }
        pattern.push('$');

        // Every non-placeholder segment went through regex::escape, so the
        // pattern is always well formed; map the error anyway rather than panic.
        let regex = Regex::new(&pattern).map_err(|_| RouteError::InvalidTemplate {
            template: template.to_string(),
            reason: "template does not compile to a path pattern",
        })?;

        Ok(Self {
            template: template.to_string(),
            regex,
            names,
        })
    }

    /// Match a request path (query string already stripped).
    ///
    /// Returns the extracted parameters on success. Values are the literal
    /// substrings of `path`; no percent-decoding is applied.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let captures = self.regex.captures(path)?;
        let mut params = PathParams::new();
        for (idx, name) in self.names.iter().enumerate() {
            let value = captures.get(idx + 1)?;
            params.push(Arc::clone(name), value.as_str().to_string());
        }
        Some(params)
    }

    /// The template as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Placeholder names in template order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(AsRef::as_ref)
    }
}

impl fmt::Debug for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathTemplate")
            .field("template", &self.template)
            .field("pattern", &self.regex.as_str())
            .finish()
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// `{name}` with at least one character between the braces.
fn parameter_name(segment: &str) -> Option<&str> {
    segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}

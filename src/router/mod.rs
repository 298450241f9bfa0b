//! # Router Module
//!
//! Path-template matching and the multi-dispatch route table.
//!
//! ## Overview
//!
//! - [`PathTemplate`] compiles a template such as `/devices/{id}` into an
//!   anchored regex and extracts named parameters from concrete paths.
//! - [`RouteTable`] keeps routes in registration order and yields every route
//!   whose [`MethodPattern`] and template accept a request. Several handlers
//!   may observe the same request; a metrics observer next to the functional
//!   handler is the typical case.
//!
//! ## Example
//!
//! ```rust
//! use connect_api::router::PathTemplate;
//!
//! let t = PathTemplate::new("/devices/{id}").unwrap();
//! let params = t.matches("/devices/42").unwrap();
//! assert_eq!(params.get("id"), Some("42"));
//! assert!(t.matches("/devices/42/volume").is_none());
//! ```

mod table;
mod template;

pub use table::{MethodPattern, Route, RouteTable, RouteTemplate};
pub use template::{PathParams, PathTemplate, MAX_INLINE_PARAMS};

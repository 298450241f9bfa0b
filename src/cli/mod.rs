//! # CLI Module
//!
//! ## Commands
//!
//! ### `serve`
//!
//! ```bash
//! connect-api serve --config connect-api.yaml --port 24879 --loopback
//! ```
//!
//! Options:
//! - `--config <FILE>` - YAML configuration; environment overrides apply on top
//! - `--host`, `--port`, `--max-connections`, `--cors-origin` - override the
//!   configuration last
//! - `--loopback` - announce an in-memory session so every route is live
//!
//! ### `routes`
//!
//! Prints the route table in registration order.

mod commands;

pub use commands::{build_server, resolve_config, run_cli, Cli, Commands, Runtime};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::api::{self, ApiContext};
use crate::config::ApiConfig;
use crate::events::EventRelay;
use crate::loopback::{LoopbackPlayerFactory, LoopbackSession};
use crate::server::HttpServer;
use crate::session::{ManualDiscovery, PlayerWrapper, ReactiveConfig, SessionRef};

/// Command-line interface for the control-plane service
#[derive(Parser)]
#[command(name = "connect-api")]
#[command(about = "HTTP control plane for a streaming session and its player", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the API server until SIGINT or SIGTERM
    Serve {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Interface to bind; overrides the configuration
        #[arg(long)]
        host: Option<String>,

        /// Port to bind; overrides the configuration
        #[arg(short, long)]
        port: Option<u16>,

        /// Bound on concurrently handled connections
        #[arg(long)]
        max_connections: Option<usize>,

        /// Value for Access-Control-Allow-Origin on every response
        #[arg(long)]
        cors_origin: Option<String>,

        /// Announce an in-memory session and player at startup
        #[arg(long, default_value_t = false)]
        loopback: bool,
    },
    /// Print the registered route table and exit
    Routes,
}

/// Configuration after file, environment and flags have been applied, in
/// that order.
///
/// # Errors
///
/// File read or parse failures, and values out of range.
pub fn resolve_config(
    path: Option<&PathBuf>,
    host: Option<&String>,
    port: Option<u16>,
    max_connections: Option<usize>,
    cors_origin: Option<&String>,
) -> Result<ApiConfig> {
    let mut config = match path {
        Some(path) => ApiConfig::load(path)?,
        None => ApiConfig::default(),
    };
    config.apply_env();
    if let Some(host) = host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(max) = max_connections {
        config.server.max_connections = max;
    }
    if let Some(origin) = cors_origin {
        config.server.cors_origin = Some(origin.clone());
    }
    config.validate()?;
    Ok(config)
}

/// The session side of the service: a discovery source and the wrapper
/// listening to it.
pub struct Runtime {
    pub discovery: ManualDiscovery,
    pub players: PlayerWrapper,
}

impl Runtime {
    #[must_use]
    pub fn new(config: &ApiConfig) -> Self {
        let reactive = if config.events.relay {
            ReactiveConfig::relaying(Arc::new(EventRelay::new()))
        } else {
            ReactiveConfig::silent()
        };
        let discovery = ManualDiscovery::new();
        let players = PlayerWrapper::from_discovery(
            &discovery,
            reactive,
            Arc::new(LoopbackPlayerFactory::new()),
            config.player.clone(),
        );
        Self { discovery, players }
    }
}

/// Build a server with every API route registered and the configured limits.
///
/// # Errors
///
/// Route registration failures.
pub fn build_server(config: &ApiConfig, runtime: &Runtime) -> Result<HttpServer> {
    let mut server = HttpServer::new();
    server
        .set_max_connections(config.server.max_connections)
        .set_join_timeout(config.server.join_timeout())
        .set_read_timeout(Some(config.server.read_timeout()));
    if let Some(origin) = &config.server.cors_origin {
        server.enable_cors(origin.clone());
    }
    let ctx = ApiContext::new(runtime.players.clone(), server.metrics());
    api::register(&mut server, &ctx).context("Failed to register API routes")?;
    Ok(server)
}

/// Execute the parsed command.
///
/// # Errors
///
/// Configuration, bind and signal registration failures.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            max_connections,
            cors_origin,
            loopback,
        } => {
            let config = resolve_config(
                config.as_ref(),
                host.as_ref(),
                port,
                max_connections,
                cors_origin.as_ref(),
            )?;
            let runtime = Runtime::new(&config);
            let server = build_server(&config, &runtime)?;
            let addr = server
                .start(&config.server.host, config.server.port)
                .context("Failed to start API server")?;
            info!(%addr, routes = server.routes().len(), "API server started");

            if loopback {
                let session: SessionRef = LoopbackSession::new("connect-api loopback");
                runtime.discovery.announce(session);
            }

            wait_for_shutdown()?;
            info!("Shutting down");
            server.stop();
            Ok(())
        }
        Commands::Routes => {
            let config = ApiConfig::default();
            let runtime = Runtime::new(&config);
            let server = build_server(&config, &runtime)?;
            for route in server.routes().iter() {
                println!("{:<8} {}", route.method.to_string(), route.template.as_str());
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
fn wait_for_shutdown() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Received shutdown signal");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown() -> Result<()> {
    loop {
        std::thread::park();
    }
}

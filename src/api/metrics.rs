use http::StatusCode;
use std::sync::Arc;

use super::player::PlayerCommand;
use crate::handler::{Handler, Reply, RouteSpec};
use crate::metrics::ServerMetrics;
use crate::server::{ApiRequest, ApiResponse};

/// `GET /metrics`
pub struct MetricsEndpoint {
    metrics: Arc<ServerMetrics>,
}

impl MetricsEndpoint {
    #[must_use]
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self { metrics }
    }
}

impl Handler for MetricsEndpoint {
    fn route(&self) -> RouteSpec {
        RouteSpec::get("/metrics")
    }

    fn handle(&self, _req: &ApiRequest) -> Reply {
        ApiResponse::text(StatusCode::OK, self.metrics.render_prometheus())
            .with_content_type("text/plain; version=0.0.4")
            .into()
    }
}

/// Counts every request to `/player/{cmd}`, whatever its verb or outcome.
/// Unknown names share the `other` label.
///
/// Registered ahead of the command handler on the same template and never
/// writes a response.
pub struct PlayerCommandObserver {
    metrics: Arc<ServerMetrics>,
}

impl PlayerCommandObserver {
    #[must_use]
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self { metrics }
    }
}

impl Handler for PlayerCommandObserver {
    fn route(&self) -> RouteSpec {
        RouteSpec::any("/player/{cmd}")
    }

    fn handle(&self, req: &ApiRequest) -> Reply {
        if let Some(cmd) = req.param("cmd") {
            self.metrics.player_command(PlayerCommand::metric_label(cmd));
        }
        Reply::Observed
    }
}

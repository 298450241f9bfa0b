//! Server counters and their Prometheus text rendering.
//!
//! Every counter is a relaxed atomic; the connection threads never block on
//! each other to record. Per-command counts are the only map and sit behind a
//! mutex touched once per observed player request.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Default)]
pub struct ServerMetrics {
    connections_accepted: AtomicU64,
    connections_active: AtomicUsize,
    connections_peak: AtomicUsize,
    requests_handled: AtomicU64,
    total_latency_ns: AtomicU64,
    unmatched_requests: AtomicU64,
    shutdown_rejections: AtomicU64,
    handler_panics: AtomicU64,
    player_commands: Mutex<BTreeMap<&'static str, u64>>,
}

impl ServerMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        let active = self.connections_active.fetch_add(1, Ordering::Relaxed) + 1;
        self.connections_peak.fetch_max(active, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturating: never wraps even if a close is recorded twice.
        let mut current = self.connections_active.load(Ordering::Relaxed);
        while current > 0 {
            match self.connections_active.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// One request went through dispatch; `matched` is the number of routes
    /// that responded to it.
    pub fn request_handled(&self, matched: usize, latency: Duration) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
        if matched == 0 {
            self.unmatched_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn shutdown_rejected(&self) {
        self.shutdown_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_panicked(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one player command. Labels are static so the set of series stays
    /// bounded.
    pub fn player_command(&self, command: &'static str) {
        let mut commands = self
            .player_commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *commands.entry(command).or_insert(0) += 1;
    }

    #[must_use]
    pub fn connections_accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connections_active(&self) -> usize {
        self.connections_active.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connections_peak(&self) -> usize {
        self.connections_peak.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn requests_handled(&self) -> u64 {
        self.requests_handled.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn shutdown_rejections(&self) -> u64 {
        self.shutdown_rejections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn handler_panics(&self) -> u64 {
        self.handler_panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn player_command_count(&self, command: &str) -> u64 {
        self.player_commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(command)
            .copied()
            .unwrap_or(0)
    }

    /// Mean dispatch latency over all handled requests.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.requests_handled();
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Prometheus text exposition format, version 0.0.4.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);
        let counters: [(&str, &str, u64); 5] = [
            (
                "connect_api_connections_accepted_total",
                "Connections accepted by the server",
                self.connections_accepted(),
            ),
            (
                "connect_api_requests_total",
                "Requests dispatched",
                self.requests_handled(),
            ),
            (
                "connect_api_unmatched_requests_total",
                "Requests no route responded to",
                self.unmatched_requests.load(Ordering::Relaxed),
            ),
            (
                "connect_api_shutdown_rejections_total",
                "Requests answered 503 because the server was stopping",
                self.shutdown_rejections(),
            ),
            (
                "connect_api_handler_panics_total",
                "Handler invocations that panicked",
                self.handler_panics(),
            ),
        ];
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }

        let gauges: [(&str, &str, String); 3] = [
            (
                "connect_api_connections_active",
                "Connections currently being handled",
                self.connections_active().to_string(),
            ),
            (
                "connect_api_connections_peak",
                "Highest number of simultaneous connections",
                self.connections_peak().to_string(),
            ),
            (
                "connect_api_request_latency_seconds_avg",
                "Mean dispatch latency",
                format!("{:.6}", self.average_latency().as_secs_f64()),
            ),
        ];
        for (name, help, value) in gauges {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"
            ));
        }

        out.push_str(
            "# HELP connect_api_player_commands_total Player commands received\n\
             # TYPE connect_api_player_commands_total counter\n",
        );
        let commands = self
            .player_commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (command, count) in commands.iter() {
            out.push_str(&format!(
                "connect_api_player_commands_total{{command=\"{command}\"}} {count}\n"
            ));
        }
        out
    }
}

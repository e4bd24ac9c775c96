//! Per-worker HTTP endpoint for the exchange metrics.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::error::{GraphexError, Result};
use crate::metrics::{global_metrics, MetricsRegistry};

pub const ENV_METRICS_ADDR: &str = "GRAPHEX_METRICS_ADDR";

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone)]
pub struct MetricsEndpoint {
    addr: SocketAddr,
    registry: &'static MetricsRegistry,
}

impl MetricsEndpoint {
    /// Endpoint over the process-wide registry.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            registry: global_metrics(),
        }
    }

    /// `None` when `GRAPHEX_METRICS_ADDR` is unset; the worker then runs
    /// without an exporter.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(raw) = lookup(ENV_METRICS_ADDR) else {
            return Ok(None);
        };
        let addr = raw.trim().parse().map_err(|e| {
            GraphexError::InvalidConfig(format!("{ENV_METRICS_ADDR}='{raw}' is not a socket address: {e}"))
        })?;
        Ok(Some(Self::new(addr)))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binds the configured address and serves `GET /metrics` until the task is dropped.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener).await
    }

    /// Serves on an already bound listener; the configured address is ignored.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(render))
            .with_state(self.registry);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn render(State(registry): State<&'static MetricsRegistry>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, PROMETHEUS_TEXT)], registry.render_prometheus())
}

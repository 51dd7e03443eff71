//! HTTP surface of a reactor instance.
//!
//! Every instance mounts the same routes; the configured module only changes
//! where its own outbound calls are resolved to.

mod handlers;

use crate::atoms::Elements;
use crate::config::{Config, BASE_PATH};
use crate::telemetry::SpanExporter;
use crate::transport::HttpDispatcher;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    dispatcher: Arc<HttpDispatcher>,
    elements: Arc<Elements>,
    exporter: Option<SpanExporter>,
}

impl AppState {
    /// Must be called inside a tokio runtime when span export is configured.
    pub fn new(config: Config) -> Result<Self, String> {
        let elements = Elements::builtin()?;
        Ok(Self::with_elements(config, elements))
    }

    pub fn with_elements(config: Config, elements: Elements) -> Self {
        let dispatcher = HttpDispatcher::new(&config);
        let exporter = SpanExporter::spawn(&config);
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            elements: Arc::new(elements),
            exporter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

pub fn router(state: AppState) -> Router {
    let reactor = Router::new()
        .route("/reactions", get(handlers::reactions))
        .route("/bonds/{bond}", get(handlers::bonds))
        .route("/atoms/{symbol}", get(handlers::atoms));
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest(BASE_PATH, reactor)
        .with_state(state)
}

/// Serve until `shutdown` fires, then let in-flight reactions finish.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let config = state.config();
    tracing::info!(
        addr = %listener.local_addr()?,
        service = %config.service_name,
        version = %config.service_version,
        mode = ?config.mode,
        module = ?config.module,
        role = ?config.role,
        propagation = ?config.trace_propagation,
        "reactor listening"
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

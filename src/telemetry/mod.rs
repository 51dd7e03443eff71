//! Logging setup and trace-context propagation.
//!
//! The subscriber is installed once at startup. Every request runs under a
//! [`SpanContext`] joined from the inbound trace headers (or a fresh root),
//! and every plan node below it derives a child, so the downstream trace
//! mirrors the plan tree. Finished spans optionally go to an OTLP collector
//! through [`SpanExporter`].

mod context;
mod export;

pub use context::{Propagation, SpanContext};
pub use export::{FinishedSpan, SpanExporter, SpanKind};

use crate::config::LogFormat;
use axum::http::HeaderMap;

/// Headers copied from the inbound request onto every outbound call. The
/// trace-context entries among them are rewritten per dispatch.
pub const PROPAGATED_HEADERS: &[&str] = &[
    "traceparent",
    "tracestate",
    "baggage",
    "x-request-id",
    "x-b3-traceid",
    "x-b3-spanid",
    "x-b3-parentspanid",
    "x-b3-sampled",
    "x-b3-flags",
    "x-ot-span-context",
];

/// Install the global `tracing` subscriber. Repeated calls are no-ops.
///
/// Request and plan spans carry `trace_id` and `span_id` fields, so every
/// entry logged inside them is stamped with the trace it belongs to.
pub fn init(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .try_init();
        }
        LogFormat::Text => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .try_init();
        }
    }
}

/// Propagation headers captured from one inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceHeaders {
    entries: Vec<(String, String)>,
}

impl TraceHeaders {
    /// Pick the propagation headers out of an inbound header map.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut out = Self::default();
        for name in PROPAGATED_HEADERS {
            if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
                out.insert(name, value);
            }
        }
        out
    }

    /// Set a header, replacing an existing value.
    pub fn insert(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name, value.to_string())),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

//! OTLP/HTTP span export.
//!
//! Finished spans are queued without waiting and a background task posts
//! them in batches as OTLP JSON to `<endpoint>/v1/traces`. A full queue or an
//! unreachable collector loses spans, never requests.

use super::SpanContext;
use crate::config::Config;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time;

const QUEUE_CAPACITY: usize = 4096;
const MAX_BATCH: usize = 512;
const FLUSH_EVERY: Duration = Duration::from_secs(1);
const SCOPE_NAME: &str = "treactor";

/// OTLP span kind codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Internal = 1,
    Server = 2,
    Client = 3,
}

/// A completed span waiting for export.
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub context: SpanContext,
    pub name: &'static str,
    pub kind: SpanKind,
    pub start: SystemTime,
    pub end: SystemTime,
    pub attributes: Vec<(&'static str, String)>,
}

/// Handle for queueing finished spans. Cloned into every request.
#[derive(Debug, Clone)]
pub struct SpanExporter {
    tx: mpsc::Sender<FinishedSpan>,
}

impl SpanExporter {
    /// Exporter whose spans land on the returned receiver.
    pub fn channel() -> (Self, mpsc::Receiver<FinishedSpan>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Start the export task when an OTLP endpoint is configured. Must be
    /// called inside a tokio runtime.
    pub fn spawn(config: &Config) -> Option<Self> {
        let endpoint = config.otlp_endpoint.as_deref()?;
        let url = format!("{}/v1/traces", endpoint.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let resource = Resource {
            service_name: config.service_name.clone(),
            service_version: config.service_version.clone(),
        };
        let (exporter, rx) = Self::channel();
        tracing::info!(url = %url, "exporting spans");
        tokio::spawn(run(rx, client, url, resource));
        Some(exporter)
    }

    pub fn export(&self, span: FinishedSpan) {
        if self.tx.try_send(span).is_err() {
            tracing::debug!("span export queue full, span dropped");
        }
    }
}

/// Identity stamped on every exported batch.
#[derive(Debug, Clone)]
struct Resource {
    service_name: String,
    service_version: String,
}

async fn run(
    mut rx: mpsc::Receiver<FinishedSpan>,
    client: reqwest::Client,
    url: String,
    resource: Resource,
) {
    let mut ticker = time::interval(FLUSH_EVERY);
    let mut batch = Vec::new();
    loop {
        tokio::select! {
            span = rx.recv() => match span {
                Some(span) => {
                    batch.push(span);
                    if batch.len() >= MAX_BATCH {
                        flush(&client, &url, &resource, &mut batch).await;
                    }
                }
                None => {
                    flush(&client, &url, &resource, &mut batch).await;
                    break;
                }
            },
            _ = ticker.tick() => flush(&client, &url, &resource, &mut batch).await,
        }
    }
}

async fn flush(client: &reqwest::Client, url: &str, resource: &Resource, batch: &mut Vec<FinishedSpan>) {
    if batch.is_empty() {
        return;
    }
    let body = encode(resource, batch);
    let count = batch.len();
    batch.clear();
    match client.post(url).json(&body).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::debug!(count, "spans exported");
        }
        Ok(response) => {
            tracing::warn!(count, status = response.status().as_u16(), "span export rejected");
        }
        Err(e) => tracing::warn!(count, error = %e, "span export failed"),
    }
}

// ============================================================================
// OTLP JSON encoding
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportRequest {
    resource_spans: Vec<ResourceSpans>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSpans {
    resource: Attributes,
    scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Serialize)]
struct Attributes {
    attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
struct ScopeSpans {
    scope: Scope,
    spans: Vec<OtlpSpan>,
}

#[derive(Debug, Serialize)]
struct Scope {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OtlpSpan {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    name: &'static str,
    kind: u8,
    start_time_unix_nano: String,
    end_time_unix_nano: String,
    attributes: Vec<KeyValue>,
}

#[derive(Debug, Serialize)]
struct KeyValue {
    key: String,
    value: StringValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StringValue {
    string_value: String,
}

fn key_value(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: StringValue {
            string_value: value.to_string(),
        },
    }
}

fn unix_nanos(at: SystemTime) -> String {
    at.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .to_string()
}

fn encode(resource: &Resource, spans: &[FinishedSpan]) -> ExportRequest {
    let spans = spans
        .iter()
        .map(|span| OtlpSpan {
            trace_id: span.context.trace_id().to_string(),
            span_id: span.context.span_id().to_string(),
            parent_span_id: span.context.parent_span_id().map(str::to_string),
            name: span.name,
            kind: span.kind as u8,
            start_time_unix_nano: unix_nanos(span.start),
            end_time_unix_nano: unix_nanos(span.end),
            attributes: span
                .attributes
                .iter()
                .map(|(k, v)| key_value(k, v))
                .collect(),
        })
        .collect();
    ExportRequest {
        resource_spans: vec![ResourceSpans {
            resource: Attributes {
                attributes: vec![
                    key_value("service.name", &resource.service_name),
                    key_value("service.version", &resource.service_version),
                ],
            },
            scope_spans: vec![ScopeSpans {
                scope: Scope {
                    name: SCOPE_NAME,
                    version: env!("CARGO_PKG_VERSION"),
                },
                spans,
            }],
        }],
    }
}

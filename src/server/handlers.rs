use super::AppState;
use crate::atoms::workload::Workload;
use crate::core::executor::ExecContext;
use crate::core::parser::{parse_atom_block, parse_plan};
use crate::core::sink::{Posted, Sink};
use crate::core::types::Capture;
use crate::telemetry::{SpanContext, SpanKind, TraceHeaders};
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::{Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

#[derive(Debug, Deserialize)]
pub(super) struct MoleculeQuery {
    #[serde(default)]
    molecule: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct AtomQuery {
    symbol: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    #[serde(rename = "InsertId")]
    insert_id: String,
}

pub(super) async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub(super) async fn reactions(
    State(state): State<AppState>,
    Query(query): Query<MoleculeQuery>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    serve_reaction(&state, &query.molecule, uri.path(), &headers).await
}

pub(super) async fn bonds(
    State(state): State<AppState>,
    Path(bond): Path<String>,
    Query(query): Query<MoleculeQuery>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    if !is_served_bond(&bond, state.config().max_bond) {
        return StatusCode::NOT_FOUND.into_response();
    }
    serve_reaction(&state, &query.molecule, uri.path(), &headers).await
}

pub(super) async fn atoms(
    State(state): State<AppState>,
    Path(path_symbol): Path<String>,
    Query(query): Query<AtomQuery>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let content = query.symbol.unwrap_or(path_symbol);
    let ctx = request_context(&state, &headers);
    let span = request_span(&ctx, uri.path());
    async {
        // cancelled when the client goes away and this future is dropped
        let _guard = ctx.cancel_token().clone().drop_guard();
        let started = SystemTime::now();
        let response = atom(&state, &ctx, &content, uri.path(), &headers).await;
        ctx.finish(
            "treactor.atom",
            SpanKind::Server,
            started,
            vec![
                ("http.target", uri.path().to_string()),
                ("symbol", content.clone()),
                ("http.status_code", response.status().as_u16().to_string()),
            ],
        );
        response
    }
    .instrument(span)
    .await
}

/// This hop's span, joined to the caller's when the request carries one.
fn request_context(state: &AppState, headers: &HeaderMap) -> ExecContext {
    let inbound = TraceHeaders::from_header_map(headers);
    let span = match SpanContext::extract(&inbound) {
        Some(caller) => caller.child(),
        None => SpanContext::root(),
    };
    ExecContext::new(CancellationToken::new(), inbound, span)
        .with_propagation(state.config().trace_propagation)
        .with_exporter(state.exporter.clone())
}

/// Log span for one request; every entry inside carries its trace ids.
fn request_span(ctx: &ExecContext, path: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        path = %path,
        trace_id = %ctx.span().trace_id(),
        span_id = %ctx.span().span_id(),
    )
}

async fn serve_reaction(state: &AppState, molecule: &str, path: &str, headers: &HeaderMap) -> Response {
    let ctx = request_context(state, headers);
    let span = request_span(&ctx, path);
    async {
        let _guard = ctx.cancel_token().clone().drop_guard();
        let started = Instant::now();
        let wall = SystemTime::now();
        tracing::info!(molecule = %molecule, "starting reaction");
        let response = react(state, &ctx, molecule, path, headers).await;
        tracing::info!(
            molecule = %molecule,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reaction finished"
        );
        ctx.finish(
            "treactor.reaction",
            SpanKind::Server,
            wall,
            vec![
                ("http.target", path.to_string()),
                ("molecule", molecule.to_string()),
                ("http.status_code", response.status().as_u16().to_string()),
            ],
        );
        response
    }
    .instrument(span)
    .await
}

/// Resolve and run one atom, answering with its capture.
async fn atom(state: &AppState, ctx: &ExecContext, content: &str, path: &str, headers: &HeaderMap) -> Response {
    let config = state.config();
    let block = match parse_atom_block(content) {
        Ok(block) => block,
        Err(e) => return failure(ctx.span(), "unable to parse atom", &e),
    };
    let element = match state.elements.resolve(&block.content, config.max_number) {
        Ok(element) => element,
        Err(e) => return failure(ctx.span(), "unable to resolve atom", &e),
    };
    let workload = match Workload::from_annotations(&block.annotations) {
        Ok(workload) => workload,
        Err(e) => return failure(ctx.span(), "invalid atom workload", &e),
    };
    if let Err(e) = workload.run(config.max_mem_mb, ctx.cancel_token()).await {
        return failure(ctx.span(), "atom workload failed", &e);
    }

    tracing::info!(
        symbol = %element.symbol,
        name = %element.name,
        number = element.number,
        "atom"
    );
    pretty_json(
        StatusCode::OK,
        &Capture {
            name: config.service_name.clone(),
            path: path.to_string(),
            headers: snapshot(headers),
            bonds: Vec::new(),
            atom: Some(element.clone()),
        },
    )
}

/// Parse and execute a molecule, answering with the collected capture.
async fn react(state: &AppState, ctx: &ExecContext, molecule: &str, path: &str, headers: &HeaderMap) -> Response {
    let plan = match parse_plan(molecule) {
        Ok(plan) => plan,
        Err(e) => return failure(ctx.span(), "unable to parse molecule", &e),
    };

    let calls = plan.leaf_count();
    tracing::debug!(plan = %plan, calls, "plan compiled");

    let sink = Sink::with_capacity(calls);
    plan.execute(ctx, state.dispatcher.as_ref(), &sink).await;

    let posted = sink.drain();
    if posted.len() < calls {
        tracing::warn!(calls, captured = posted.len(), "reaction incomplete");
    }
    let bonds = if state.config().ordered_bonds {
        Posted::into_declaration_order(posted)
    } else {
        Posted::into_receipt_order(posted)
    };

    pretty_json(
        StatusCode::OK,
        &Capture {
            name: state.config().service_name.clone(),
            path: path.to_string(),
            headers: snapshot(headers),
            bonds,
            atom: None,
        },
    )
}

fn is_served_bond(bond: &str, max_bond: usize) -> bool {
    bond == "n"
        || bond
            .parse::<usize>()
            .is_ok_and(|k| (1..=max_bond).contains(&k))
}

/// Inbound headers with repeated values joined by `|`.
fn snapshot(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .keys()
        .map(|name| {
            let joined = headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join("|");
            (name.as_str().to_string(), joined)
        })
        .collect()
}

/// 400 answer. The insert id is the request's trace id, so a client can find
/// the failure in both the logs and the trace.
fn failure(span: &SpanContext, message: &str, err: &dyn Display) -> Response {
    let id = span.trace_id().to_string();
    tracing::error!(insert_id = %id, error = %err, "{}", message);
    pretty_json(StatusCode::BAD_REQUEST, &ErrorBody { insert_id: id })
}

fn pretty_json<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec_pretty(body) {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

//! Plan execution engine.
//!
//! Walks a [`Plan`] and issues one [`Dispatcher`] call per leaf repetition,
//! posting each successful result into a [`Sink`] sized to the plan's leaf
//! count. Fan-out is structured: parallel branches are joined in place and a
//! call returns only after every branch below it has finished.
//!
//! A failed dispatch is logged and dropped. It never aborts a sibling or an
//! ancestor; the only trace it leaves is a sink with fewer entries.

use super::sink::Sink;
use super::types::*;
use crate::telemetry::{FinishedSpan, Propagation, SpanContext, SpanExporter, SpanKind, TraceHeaders};
use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture, FutureExt};
use std::time::SystemTime;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Failure of a single leaf dispatch. Transport details stay behind the
/// boxed source.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("dispatch cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Leaf work, supplied by the caller.
///
/// The engine never inspects `Output`; it is forwarded to the sink unchanged.
/// Retries, if any, belong to the implementation.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    type Output: Send;

    /// Run one atom. `content` is the raw block content (`symbol[,k:v...]`).
    async fn dispatch_atom(
        &self,
        ctx: &ExecContext,
        content: &str,
    ) -> Result<Self::Output, DispatchError>;

    /// Hand a nested molecule fragment to a peer engine.
    async fn dispatch_bond(
        &self,
        ctx: &ExecContext,
        fragment: &str,
    ) -> Result<Self::Output, DispatchError>;
}

/// Per-request execution context: cancellation plus the span the current
/// plan node runs under.
///
/// Each block, operator and dispatch works on a [`child`](Self::child), so
/// the spans injected into outbound calls form the same tree as the plan.
#[derive(Debug, Clone)]
pub struct ExecContext {
    cancel: CancellationToken,
    trace: TraceHeaders,
    span: SpanContext,
    propagation: Propagation,
    exporter: Option<SpanExporter>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new(CancellationToken::new(), TraceHeaders::default(), SpanContext::root())
    }
}

impl ExecContext {
    /// `trace` holds the inbound propagation headers; `span` is the request's
    /// own span.
    pub fn new(cancel: CancellationToken, trace: TraceHeaders, span: SpanContext) -> Self {
        Self {
            cancel,
            trace,
            span,
            propagation: Propagation::default(),
            exporter: None,
        }
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_exporter(mut self, exporter: Option<SpanExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn span(&self) -> &SpanContext {
        &self.span
    }

    /// Same request, new span parented on this one.
    pub fn child(&self) -> Self {
        Self {
            span: self.span.child(),
            ..self.clone()
        }
    }

    /// Headers for an outbound call made under this context: the inbound
    /// baggage and ids with this span injected as the caller.
    pub fn outbound_headers(&self) -> TraceHeaders {
        let mut headers = self.trace.clone();
        self.span.inject(self.propagation, &mut headers);
        headers
    }

    /// Close this context's span. Queued for export when an exporter is set
    /// and the trace is sampled.
    pub fn finish(
        &self,
        name: &'static str,
        kind: SpanKind,
        start: SystemTime,
        attributes: Vec<(&'static str, String)>,
    ) {
        if !self.span.is_sampled() {
            return;
        }
        if let Some(exporter) = &self.exporter {
            exporter.export(FinishedSpan {
                context: self.span.clone(),
                name,
                kind,
                start,
                end: SystemTime::now(),
                attributes,
            });
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Plan {
    /// Execute the whole plan. Returns once every leaf has completed or been
    /// dropped. Size `sink` with [`Plan::leaf_count`] beforehand.
    pub async fn execute<D: Dispatcher>(
        &self,
        ctx: &ExecContext,
        dispatcher: &D,
        sink: &Sink<D::Output>,
    ) {
        self.execute_at(0, ctx, dispatcher, sink).await;
    }

    /// `base` is the declaration index of this subtree's first leaf.
    fn execute_at<'a, D: Dispatcher>(
        &'a self,
        base: usize,
        parent: &ExecContext,
        dispatcher: &'a D,
        sink: &'a Sink<D::Output>,
    ) -> BoxFuture<'a, ()> {
        let ctx = parent.child();
        match self {
            Plan::Block(block) => {
                let span = tracing::debug_span!(
                    "plan.block",
                    times = block.times,
                    mode = %block.mode,
                    leaf = %block.leaf(),
                    content = %block.content,
                    trace_id = %ctx.span().trace_id(),
                    span_id = %ctx.span().span_id(),
                );
                async move {
                    let started = SystemTime::now();
                    block.execute_at(base, &ctx, dispatcher, sink).await;
                    ctx.finish(
                        "plan.block",
                        SpanKind::Internal,
                        started,
                        vec![
                            ("times", block.times.to_string()),
                            ("mode", block.mode.to_string()),
                            ("content", block.content.clone()),
                        ],
                    );
                }
                .instrument(span)
                .boxed()
            }
            Plan::Operator(op) => {
                let span = tracing::debug_span!(
                    "plan.operator",
                    op = %op.kind.symbol(),
                    trace_id = %ctx.span().trace_id(),
                    span_id = %ctx.span().span_id(),
                );
                async move {
                    let started = SystemTime::now();
                    op.execute_at(base, &ctx, dispatcher, sink).await;
                    ctx.finish(
                        "plan.operator",
                        SpanKind::Internal,
                        started,
                        vec![("op", op.kind.symbol().to_string())],
                    );
                }
                .instrument(span)
                .boxed()
            }
        }
    }
}

impl Block {
    async fn execute_at<D: Dispatcher>(
        &self,
        base: usize,
        ctx: &ExecContext,
        dispatcher: &D,
        sink: &Sink<D::Output>,
    ) {
        let leaf = self.leaf();
        match self.mode {
            Mode::Sequential => {
                for i in 0..self.times {
                    self.dispatch_one(leaf, base + i, ctx, dispatcher, sink)
                        .await;
                }
            }
            Mode::Parallel => {
                let repetitions: Vec<_> = (0..self.times)
                    .map(|i| self.dispatch_one(leaf, base + i, ctx, dispatcher, sink))
                    .collect();
                join_all(repetitions).await;
            }
        }
    }

    /// One leaf repetition under its own child span.
    async fn dispatch_one<D: Dispatcher>(
        &self,
        leaf: Leaf,
        index: usize,
        parent: &ExecContext,
        dispatcher: &D,
        sink: &Sink<D::Output>,
    ) {
        if parent.is_cancelled() {
            tracing::debug!(index, "request cancelled, leaf skipped");
            return;
        }

        let ctx = parent.child();
        let span = tracing::debug_span!(
            "plan.dispatch",
            index,
            leaf = %leaf,
            trace_id = %ctx.span().trace_id(),
            span_id = %ctx.span().span_id(),
        );
        let started = SystemTime::now();
        let outcome = self
            .call(leaf, index, &ctx, dispatcher, sink)
            .instrument(span)
            .await;
        ctx.finish(
            "plan.dispatch",
            SpanKind::Client,
            started,
            vec![
                ("leaf", leaf.to_string()),
                ("index", index.to_string()),
                ("content", self.content.clone()),
                ("outcome", outcome.to_string()),
            ],
        );
    }

    /// Dispatch and post the result. Returns the outcome label.
    async fn call<D: Dispatcher>(
        &self,
        leaf: Leaf,
        index: usize,
        ctx: &ExecContext,
        dispatcher: &D,
        sink: &Sink<D::Output>,
    ) -> &'static str {
        let call = async {
            match leaf {
                Leaf::Atom => dispatcher.dispatch_atom(ctx, &self.content).await,
                Leaf::Bond => dispatcher.dispatch_bond(ctx, &self.content).await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(DispatchError::Cancelled),
            result = call => result,
        };

        match result {
            Ok(value) => match sink.post(index, value) {
                Ok(()) => "ok",
                Err(e) => {
                    tracing::error!(index, error = %e, "result dropped");
                    "dropped"
                }
            },
            Err(DispatchError::Cancelled) => {
                tracing::debug!(index, "dispatch cancelled");
                "cancelled"
            }
            Err(e) => {
                tracing::warn!(
                    index,
                    leaf = %leaf,
                    content = %self.content,
                    error = %e,
                    "dispatch failed"
                );
                "failed"
            }
        }
    }
}

impl Operator {
    async fn execute_at<D: Dispatcher>(
        &self,
        base: usize,
        ctx: &ExecContext,
        dispatcher: &D,
        sink: &Sink<D::Output>,
    ) {
        let right_base = base + self.left.leaf_count();
        match self.kind {
            OperatorKind::SequentialThen => {
                self.left.execute_at(base, ctx, dispatcher, sink).await;
                self.right
                    .execute_at(right_base, ctx, dispatcher, sink)
                    .await;
            }
            OperatorKind::ParallelBoth => {
                tokio::join!(
                    self.left.execute_at(base, ctx, dispatcher, sink),
                    self.right.execute_at(right_base, ctx, dispatcher, sink),
                );
            }
        }
    }
}

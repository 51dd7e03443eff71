//! Span identity and its wire formats (W3C `traceparent`, B3 multi-header).

use super::TraceHeaders;
use clap::ValueEnum;
use uuid::Uuid;

/// Header format written onto outbound calls. Inbound requests are accepted
/// in either format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Propagation {
    /// `traceparent: 00-<trace-id>-<span-id>-<flags>`
    #[default]
    W3c,
    /// `x-b3-traceid`, `x-b3-spanid`, `x-b3-parentspanid`, `x-b3-sampled`
    B3,
}

const B3_HEADERS: &[&str] = &[
    "x-b3-traceid",
    "x-b3-spanid",
    "x-b3-parentspanid",
    "x-b3-sampled",
    "x-b3-flags",
];

const W3C_HEADERS: &[&str] = &["traceparent", "tracestate"];

/// Identity of one span: 32-hex trace id, 16-hex span id, optional parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    sampled: bool,
}

impl SpanContext {
    /// Start a new sampled trace.
    pub fn root() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
            parent_span_id: None,
            sampled: true,
        }
    }

    /// The caller's span from inbound headers: `traceparent` first, then B3.
    pub fn extract(headers: &TraceHeaders) -> Option<Self> {
        headers
            .get("traceparent")
            .and_then(from_traceparent)
            .or_else(|| from_b3(headers))
    }

    /// A new span in the same trace, parented on this one.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn traceparent(&self) -> String {
        format!(
            "00-{}-{}-{}",
            self.trace_id,
            self.span_id,
            if self.sampled { "01" } else { "00" }
        )
    }

    /// Write this span into `headers` in the chosen format, dropping any
    /// stale context of the other format.
    pub fn inject(&self, propagation: Propagation, headers: &mut TraceHeaders) {
        match propagation {
            Propagation::W3c => {
                for name in B3_HEADERS {
                    headers.remove(name);
                }
                headers.insert("traceparent", &self.traceparent());
            }
            Propagation::B3 => {
                for name in B3_HEADERS.iter().chain(W3C_HEADERS) {
                    headers.remove(name);
                }
                headers.insert("x-b3-traceid", &self.trace_id);
                headers.insert("x-b3-spanid", &self.span_id);
                if let Some(parent) = &self.parent_span_id {
                    headers.insert("x-b3-parentspanid", parent);
                }
                headers.insert("x-b3-sampled", if self.sampled { "1" } else { "0" });
            }
        }
    }
}

fn new_span_id() -> String {
    // the variant nibble keeps the low half of a v4 uuid non-zero
    Uuid::new_v4().simple().to_string()[16..].to_string()
}

fn is_hex_id(id: &str, len: usize) -> bool {
    id.len() == len && id.bytes().all(|b| b.is_ascii_hexdigit()) && id.bytes().any(|b| b != b'0')
}

fn from_traceparent(value: &str) -> Option<SpanContext> {
    let parts: Vec<&str> = value.trim().split('-').collect();
    let &[version, trace_id, span_id, flags] = parts.as_slice() else {
        return None;
    };
    if version.len() != 2 || version.eq_ignore_ascii_case("ff") || flags.len() != 2 {
        return None;
    }
    if !is_hex_id(trace_id, 32) || !is_hex_id(span_id, 16) {
        return None;
    }
    let flags = u8::from_str_radix(flags, 16).ok()?;
    Some(SpanContext {
        trace_id: trace_id.to_ascii_lowercase(),
        span_id: span_id.to_ascii_lowercase(),
        parent_span_id: None,
        sampled: flags & 1 == 1,
    })
}

fn from_b3(headers: &TraceHeaders) -> Option<SpanContext> {
    let trace_id = headers.get("x-b3-traceid")?.trim();
    let span_id = headers.get("x-b3-spanid")?.trim();
    // 64-bit B3 trace ids are left-padded to the 128-bit form
    let trace_id = match trace_id.len() {
        16 => format!("{:0>32}", trace_id),
        _ => trace_id.to_string(),
    };
    if !is_hex_id(&trace_id, 32) || !is_hex_id(span_id, 16) {
        return None;
    }
    let debug = headers.get("x-b3-flags") == Some("1");
    let sampled = match headers.get("x-b3-sampled") {
        Some(v) => debug || v == "1" || v.eq_ignore_ascii_case("true"),
        None => true,
    };
    Some(SpanContext {
        trace_id: trace_id.to_ascii_lowercase(),
        span_id: span_id.to_ascii_lowercase(),
        parent_span_id: None,
        sampled,
    })
}

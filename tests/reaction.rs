//! End-to-end reactions against a local-mode server on an ephemeral port.
//! Every atom and bond call loops back into the same process.

use axum::routing::post;
use axum::{Json, Router};
use reqwest::StatusCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use treactor::config::Config;
use treactor::core::types::Capture;
use treactor::server::{self, AppState};
use treactor::telemetry::Propagation;

const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

struct Reactor {
    base: String,
    shutdown: CancellationToken,
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start(configure: impl FnOnce(&mut Config)) -> Reactor {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut config = Config::local(port);
    configure(&mut config);
    let state = AppState::new(config).unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server::serve(listener, state, shutdown.clone()));
    Reactor {
        base: format!("http://127.0.0.1:{}", port),
        shutdown,
    }
}

async fn get(url: &str, query: &[(&str, &str)]) -> reqwest::Response {
    reqwest::Client::new()
        .get(url)
        .query(query)
        .send()
        .await
        .unwrap()
}

async fn react(reactor: &Reactor, molecule: &str) -> Capture {
    let response = get(
        &format!("{}/treact/reactions", reactor.base),
        &[("molecule", molecule)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

fn atom_symbols(capture: &Capture) -> Vec<String> {
    capture
        .bonds
        .iter()
        .filter_map(|b| b.atom.as_ref().map(|a| a.symbol.clone()))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_healthz() {
    let reactor = start(|_| {}).await;
    let response = get(&format!("{}/healthz", reactor.base), &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.text().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_builds_call_tree() {
    let reactor = start(|_| {}).await;
    let capture = react(&reactor, "2p[H]*[3[O]]").await;

    assert_eq!(capture.name, "treactor-app");
    assert_eq!(capture.path, "/treact/reactions");
    assert!(capture.atom.is_none());
    assert_eq!(capture.bonds.len(), 3);
    assert_eq!(capture.atom_count(), 5);

    let bond = capture
        .bonds
        .iter()
        .find(|b| b.atom.is_none())
        .expect("one nested bond capture");
    assert_eq!(bond.path, "/treact/bonds/n");
    assert_eq!(atom_symbols(bond), vec!["O", "O", "O"]);

    let mut atoms = atom_symbols(&capture);
    atoms.sort();
    assert_eq!(atoms, vec!["H", "H"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_atom_descriptor() {
    let reactor = start(|_| {}).await;
    let capture = react(&reactor, "[Fe,cpu:1,mem:1]").await;
    let atom = capture.bonds[0].atom.as_ref().unwrap();
    assert_eq!(atom.name, "Iron");
    assert_eq!((atom.number, atom.period, atom.group), (26, 4, 8));
    assert_eq!(capture.bonds[0].path, "/treact/atoms/fe");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_ordered_bonds() {
    let reactor = start(|c| c.ordered_bonds = true).await;
    let capture = react(&reactor, "[Li,cpu:50]*[Be]*[B]").await;
    assert_eq!(atom_symbols(&capture), vec!["Li", "Be", "B"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_failed_leaf_is_dropped() {
    let reactor = start(|c| c.max_number = 10).await;
    // Na is number 11: its atom call answers 400 and is left out
    let capture = react(&reactor, "[H]^[Na]^2[C]").await;
    assert_eq!(atom_symbols(&capture), vec!["H", "C", "C"]);
}

/// `(trace_id, span_id)` of a `traceparent` value.
fn ids(traceparent: &str) -> (String, String) {
    let parts: Vec<&str> = traceparent.split('-').collect();
    assert_eq!(parts.len(), 4, "traceparent {}", traceparent);
    (parts[1].to_string(), parts[2].to_string())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_propagates_trace_headers() {
    let reactor = start(|_| {}).await;
    let response = reqwest::Client::new()
        .get(format!("{}/treact/reactions", reactor.base))
        .query(&[("molecule", "[[He]]")])
        .header("traceparent", TRACEPARENT)
        .header("x-request-id", "req-42")
        .header("x-not-propagated", "1")
        .send()
        .await
        .unwrap();
    let capture: Capture = response.json().await.unwrap();
    assert_eq!(capture.headers["traceparent"], TRACEPARENT);
    let (trace_id, client_span) = ids(TRACEPARENT);

    let bond = &capture.bonds[0];
    let (bond_trace, bond_caller) = ids(&bond.headers["traceparent"]);
    assert_eq!(bond_trace, trace_id);
    assert_ne!(bond_caller, client_span);
    assert_eq!(bond.headers["x-request-id"], "req-42");
    assert!(!bond.headers.contains_key("x-not-propagated"));

    let atom = &bond.bonds[0];
    let (atom_trace, atom_caller) = ids(&atom.headers["traceparent"]);
    assert_eq!(atom_trace, trace_id);
    assert_ne!(atom_caller, bond_caller);
    assert_ne!(atom_caller, client_span);
    assert_eq!(atom.headers["x-request-id"], "req-42");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_starts_trace_when_untraced() {
    let reactor = start(|_| {}).await;
    let capture = react(&reactor, "2[[H]]").await;
    assert!(!capture.headers.contains_key("traceparent"));

    let (first, _) = ids(&capture.bonds[0].headers["traceparent"]);
    let (second, _) = ids(&capture.bonds[1].headers["traceparent"]);
    assert_eq!(first, second);
    let (nested, _) = ids(&capture.bonds[0].bonds[0].headers["traceparent"]);
    assert_eq!(nested, first);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_b3_propagation() {
    let reactor = start(|c| c.trace_propagation = Propagation::B3).await;
    let response = reqwest::Client::new()
        .get(format!("{}/treact/reactions", reactor.base))
        .query(&[("molecule", "[[He]]")])
        .header("traceparent", TRACEPARENT)
        .send()
        .await
        .unwrap();
    let capture: Capture = response.json().await.unwrap();
    let (trace_id, _) = ids(TRACEPARENT);

    let bond = &capture.bonds[0];
    assert_eq!(bond.headers["x-b3-traceid"], trace_id);
    assert!(!bond.headers.contains_key("traceparent"));
    let atom = &bond.bonds[0];
    assert_eq!(atom.headers["x-b3-traceid"], trace_id);
    assert_ne!(atom.headers["x-b3-spanid"], bond.headers["x-b3-spanid"]);
    assert!(atom.headers.contains_key("x-b3-parentspanid"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_parse_error_returns_insert_id() {
    let reactor = start(|_| {}).await;
    let response = reqwest::Client::new()
        .get(format!("{}/treact/reactions", reactor.base))
        .query(&[("molecule", "3q[H]")])
        .header("traceparent", TRACEPARENT)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::json!({"InsertId": "4bf92f3577b34da6a3ce929d0e0e4736"})
    );

    let response = get(
        &format!("{}/treact/reactions", reactor.base),
        &[("molecule", "[H")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    let id = body["InsertId"].as_str().unwrap();
    assert_eq!(id.len(), 32);
    assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_oversized_molecule_is_rejected() {
    let reactor = start(|_| {}).await;
    for molecule in ["18446744073709551615[H]^[H]", "3000000000000000000[H]"] {
        let response = get(
            &format!("{}/treact/reactions", reactor.base),
            &[("molecule", molecule)],
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "molecule {}", molecule);
    }
    // the server is still up
    let capture = react(&reactor, "[H]").await;
    assert_eq!(capture.atom_count(), 1);
}

/// Spans posted to a fake OTLP collector, flattened across batches.
fn collected_spans(received: &Mutex<Vec<serde_json::Value>>) -> Vec<serde_json::Value> {
    received
        .lock()
        .unwrap()
        .iter()
        .flat_map(|batch| {
            batch["resourceSpans"]
                .as_array()
                .into_iter()
                .flatten()
                .flat_map(|r| r["scopeSpans"].as_array().into_iter().flatten())
                .flat_map(|s| s["spans"].as_array().into_iter().flatten())
                .cloned()
                .collect::<Vec<_>>()
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaction_exports_spans() {
    let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
    let sink = Arc::clone(&received);
    let collector = Router::new().route(
        "/v1/traces",
        post(move |Json(body): Json<serde_json::Value>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(body);
                StatusCode::OK
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move { axum::serve(listener, collector).await });

    let reactor = start(move |c| c.otlp_endpoint = Some(endpoint)).await;
    let response = reqwest::Client::new()
        .get(format!("{}/treact/reactions", reactor.base))
        .query(&[("molecule", "[H]^[[He]]")])
        .header("traceparent", TRACEPARENT)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // the exporter flushes once a second
    let mut spans = Vec::new();
    for _ in 0..50 {
        spans = collected_spans(&received);
        if spans.iter().filter(|s| s["name"] == "treactor.reaction").count() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let (trace_id, client_span) = ids(TRACEPARENT);
    assert!(spans.iter().all(|s| s["traceId"] == trace_id.as_str()));
    let roots: Vec<&serde_json::Value> = spans
        .iter()
        .filter(|s| s["parentSpanId"] == client_span.as_str())
        .collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["name"], "treactor.reaction");
    for name in ["plan.operator", "plan.block", "plan.dispatch", "treactor.atom"] {
        assert!(spans.iter().any(|s| s["name"] == name), "no {} span", name);
    }
    // every exported span except the entry one hangs off another exported span
    for span in &spans {
        if span["parentSpanId"] == client_span.as_str() {
            continue;
        }
        assert!(
            spans.iter().any(|p| p["spanId"] == span["parentSpanId"]),
            "orphan span {}",
            span
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bond_routes() {
    let reactor = start(|_| {}).await;
    for bond in ["1", "5", "n"] {
        let response = get(
            &format!("{}/treact/bonds/{}", reactor.base, bond),
            &[("molecule", "[H]")],
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK, "bond {}", bond);
    }
    for bond in ["0", "6", "x"] {
        let response = get(
            &format!("{}/treact/bonds/{}", reactor.base, bond),
            &[("molecule", "[H]")],
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "bond {}", bond);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_atom_rejections() {
    let reactor = start(|c| c.max_mem_mb = 4).await;
    for symbol in ["Xx", "Rf", "H,mem:8", "H,cpu:soon", "H,log", "[H]"] {
        let response = get(
            &format!("{}/treact/atoms/h", reactor.base),
            &[("symbol", symbol)],
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "symbol {}", symbol);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body.get("InsertId").is_some());
    }

    let response = get(
        &format!("{}/treact/atoms/h", reactor.base),
        &[("symbol", "H,mem:4,log:1")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_atom_symbol_defaults_to_path() {
    let reactor = start(|_| {}).await;
    let response = get(&format!("{}/treact/atoms/he", reactor.base), &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let capture: Capture = response.json().await.unwrap();
    assert_eq!(capture.atom.unwrap().symbol, "He");
}

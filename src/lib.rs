//! treactor: a synthetic workload and tracing exerciser.
//!
//! A molecule expression such as `2p[H]*[3[O]]` compiles into a plan tree.
//! Executing it fans calls out to atom services (CPU and memory work) and
//! bond services (nested molecules on peer instances), and the collected
//! captures mirror the call tree with the propagated trace context.

pub mod atoms;
pub mod cli;
pub mod config;
pub mod core;
pub mod server;
pub mod telemetry;
pub mod transport;

//! Synthetic work requested through atom annotations.
//!
//! `mem:<n>` allocates and discards n MiB, `cpu:<ms>` busy-spins for the given
//! number of milliseconds. Other annotation keys are ignored here.

use indexmap::IndexMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const MIB: f64 = 1024.0 * 1024.0;
const PAGE: usize = 4096;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("unknown element '{0}'")]
    UnknownElement(String),

    #[error("element {symbol} (number {number}) is beyond the maximum number {max_number}")]
    BeyondMaxNumber {
        symbol: String,
        number: u32,
        max_number: u32,
    },

    #[error("invalid quantity for '{key}': '{value}'")]
    InvalidQuantity { key: String, value: String },

    #[error("requested {requested_mb} MiB exceeds the limit of {max_mb} MiB")]
    MemoryLimit { requested_mb: f64, max_mb: u64 },

    #[error("cpu work cancelled after {elapsed_ms}ms of {requested_ms}ms")]
    Cancelled { elapsed_ms: u128, requested_ms: u128 },

    #[error("cpu worker failed: {0}")]
    Worker(String),
}

/// Parse a non-negative quantity with an optional `k`, `m` or `g` suffix
/// (×10³, ×10⁶, ×10⁹).
pub fn parse_quantity(key: &str, value: &str) -> Result<f64, WorkloadError> {
    let invalid = || WorkloadError::InvalidQuantity {
        key: key.to_string(),
        value: value.to_string(),
    };
    let (digits, factor) = match value.char_indices().last() {
        Some((i, 'k' | 'K')) => (&value[..i], 1e3),
        Some((i, 'm' | 'M')) => (&value[..i], 1e6),
        Some((i, 'g' | 'G')) => (&value[..i], 1e9),
        Some(_) => (value, 1.0),
        None => return Err(invalid()),
    };
    let n: f64 = digits.parse().map_err(|_| invalid())?;
    let n = n * factor;
    if !n.is_finite() || n < 0.0 {
        return Err(invalid());
    }
    Ok(n)
}

/// Work requested by one atom call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workload {
    pub mem_mb: Option<f64>,
    pub cpu: Option<Duration>,
}

impl Workload {
    pub fn from_annotations(annotations: &IndexMap<String, String>) -> Result<Self, WorkloadError> {
        let mem_mb = match annotations.get("mem") {
            Some(v) => Some(parse_quantity("mem", v)?),
            None => None,
        };
        let cpu = match annotations.get("cpu") {
            Some(v) => {
                let ms = parse_quantity("cpu", v)?;
                let duration = Duration::try_from_secs_f64(ms / 1000.0).map_err(|_| {
                    WorkloadError::InvalidQuantity {
                        key: "cpu".to_string(),
                        value: v.clone(),
                    }
                })?;
                Some(duration)
            }
            None => None,
        };
        Ok(Self { mem_mb, cpu })
    }

    /// Memory first, then CPU.
    pub async fn run(&self, max_mem_mb: u64, cancel: &CancellationToken) -> Result<(), WorkloadError> {
        if let Some(mb) = self.mem_mb {
            let bytes = allocate(mb, max_mem_mb)?;
            tracing::debug!(bytes, "memory workload done");
        }
        if let Some(duration) = self.cpu {
            let spent = spin(duration, cancel.clone()).await?;
            tracing::debug!(ms = spent.as_millis() as u64, "cpu workload done");
        }
        Ok(())
    }
}

/// Allocate `mb` MiB, touch every page, then release it. Returns the size.
pub fn allocate(mb: f64, max_mem_mb: u64) -> Result<usize, WorkloadError> {
    if mb > max_mem_mb as f64 {
        return Err(WorkloadError::MemoryLimit {
            requested_mb: mb,
            max_mb: max_mem_mb,
        });
    }
    let bytes = (mb * MIB) as usize;
    let mut buf = vec![0u8; bytes];
    for i in (0..bytes).step_by(PAGE) {
        buf[i] = 1;
    }
    std::hint::black_box(&buf);
    Ok(bytes)
}

/// Busy-spin on a blocking thread until `duration` elapses or `cancel` fires.
pub async fn spin(duration: Duration, cancel: CancellationToken) -> Result<Duration, WorkloadError> {
    let worker = tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return Ok(elapsed);
            }
            if cancel.is_cancelled() {
                return Err(WorkloadError::Cancelled {
                    elapsed_ms: elapsed.as_millis(),
                    requested_ms: duration.as_millis(),
                });
            }
            std::hint::spin_loop();
        }
    });
    worker
        .await
        .map_err(|e| WorkloadError::Worker(e.to_string()))?
}

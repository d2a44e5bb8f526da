use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use strum::{EnumCount, IntoEnumIterator};

use crate::frame::Opcode;

/// Counters shared by every connection of a proxy instance.
///
/// Each counter is bumped at most once per event and only read when exported, so relaxed atomics
/// are enough.
#[derive(Debug)]
pub struct ProxyStats {
    prefix: String,
    pub downstream_cx_total: AtomicU64,
    pub downstream_cx_active: AtomicU64,
    pub downstream_cx_rx_bytes_total: AtomicU64,
    pub downstream_cx_tx_bytes_total: AtomicU64,
    pub downstream_cx_protocol_error: AtomicU64,
    pub downstream_cx_drain_close: AtomicU64,
    pub downstream_rq_total: AtomicU64,
    pub downstream_rq_active: AtomicU64,
    pub downstream_rq_rejected: AtomicU64,
    pub downstream_rq_backend_failure: AtomicU64,
    pub downstream_rq_cancelled: AtomicU64,
    pub decode_error: AtomicU64,
    pub encode_error: AtomicU64,
    ops: [AtomicU64; Opcode::COUNT],
}

impl ProxyStats {
    pub fn new(prefix: impl Into<String>) -> ProxyStats {
        ProxyStats {
            prefix: prefix.into(),
            downstream_cx_total: AtomicU64::new(0),
            downstream_cx_active: AtomicU64::new(0),
            downstream_cx_rx_bytes_total: AtomicU64::new(0),
            downstream_cx_tx_bytes_total: AtomicU64::new(0),
            downstream_cx_protocol_error: AtomicU64::new(0),
            downstream_cx_drain_close: AtomicU64::new(0),
            downstream_rq_total: AtomicU64::new(0),
            downstream_rq_active: AtomicU64::new(0),
            downstream_rq_rejected: AtomicU64::new(0),
            downstream_rq_backend_failure: AtomicU64::new(0),
            downstream_rq_cancelled: AtomicU64::new(0),
            decode_error: AtomicU64::new(0),
            encode_error: AtomicU64::new(0),
            ops: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Decrements a gauge.
    pub fn dec(gauge: &AtomicU64) {
        gauge.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_op(&self, opcode: Opcode) {
        Self::inc(&self.ops[opcode as usize]);
    }

    pub fn op(&self, opcode: Opcode) -> u64 {
        self.ops[opcode as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let mut counters = vec![
            ("downstream_cx_total", load(&self.downstream_cx_total)),
            ("downstream_cx_active", load(&self.downstream_cx_active)),
            (
                "downstream_cx_rx_bytes_total",
                load(&self.downstream_cx_rx_bytes_total),
            ),
            (
                "downstream_cx_tx_bytes_total",
                load(&self.downstream_cx_tx_bytes_total),
            ),
            (
                "downstream_cx_protocol_error",
                load(&self.downstream_cx_protocol_error),
            ),
            (
                "downstream_cx_drain_close",
                load(&self.downstream_cx_drain_close),
            ),
            ("downstream_rq_total", load(&self.downstream_rq_total)),
            ("downstream_rq_active", load(&self.downstream_rq_active)),
            ("downstream_rq_rejected", load(&self.downstream_rq_rejected)),
            (
                "downstream_rq_backend_failure",
                load(&self.downstream_rq_backend_failure),
            ),
            (
                "downstream_rq_cancelled",
                load(&self.downstream_rq_cancelled),
            ),
            ("decode_error", load(&self.decode_error)),
            ("encode_error", load(&self.encode_error)),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect::<Vec<_>>();

        counters.extend(
            Opcode::iter().map(|opcode| (format!("op_{}", opcode.name()), self.op(opcode))),
        );

        StatsSnapshot {
            prefix: self.prefix.clone(),
            counters,
        }
    }
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new("proxy")
    }
}

/// A point in time copy of every counter, in a stable order.
#[derive(Clone, Debug, PartialEq)]
pub struct StatsSnapshot {
    pub prefix: String,
    pub counters: Vec<(String, u64)>,
}

impl StatsSnapshot {
    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters
            .iter()
            .find(|(counter, _)| counter == name)
            .map(|(_, value)| *value)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.counters {
            writeln!(f, "memcached.{}.{}: {}", self.prefix, name, value)?;
        }
        Ok(())
    }
}

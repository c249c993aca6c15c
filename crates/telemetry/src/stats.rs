//! Process-wide model statistics.
//!
//! One [`GlobalModelStats`] is created per process and handed to every
//! model query service as an `Arc`. Concurrent runs add to it without
//! locks and without lost updates.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared handle to the process-wide counters.
pub type SharedModelStats = Arc<GlobalModelStats>;

/// Lock-free accumulator of cost and call count across all models.
#[derive(Debug, Default)]
pub struct GlobalModelStats {
    /// `f64` cost stored as raw bits so it can be updated with CAS.
    cost_bits: AtomicU64,
    n_calls: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub cost: f64,
    pub n_calls: u64,
}

impl GlobalModelStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh shared handle.
    pub fn shared() -> SharedModelStats {
        Arc::new(Self::new())
    }

    /// Record one successful call costing `cost` USD.
    pub fn add(&self, cost: f64) {
        let mut current = self.cost_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + cost).to_bits();
            match self.cost_bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.n_calls.fetch_add(1, Ordering::AcqRel);
    }

    /// Total cost in USD.
    pub fn cost(&self) -> f64 {
        f64::from_bits(self.cost_bits.load(Ordering::Acquire))
    }

    /// Total successful calls.
    pub fn n_calls(&self) -> u64 {
        self.n_calls.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cost: self.cost(),
            n_calls: self.n_calls(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let stats = GlobalModelStats::new();
        assert_eq!(stats.cost(), 0.0);
        assert_eq!(stats.n_calls(), 0);
    }

    #[test]
    fn add_accumulates() {
        let stats = GlobalModelStats::new();
        stats.add(0.25);
        stats.add(0.5);
        assert!((stats.cost() - 0.75).abs() < 1e-12);
        assert_eq!(stats.n_calls(), 2);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let stats = GlobalModelStats::shared();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add(0.5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.n_calls(), 8000);
        // 0.5 is exactly representable, so the sum is exact
        assert_eq!(stats.cost(), 4000.0);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = GlobalModelStats::new();
        stats.add(1.0);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["n_calls"], 1);
        assert_eq!(json["cost"], 1.0);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-local counters for built contexts
#[derive(Debug, Default)]
pub struct ContextMetrics {
    built: AtomicU64,
    cache_hits: AtomicU64,
    optimizations: AtomicU64,
    budget_rejections: AtomicU64,
    token_sum: AtomicU64,
}

/// Read-out of [`ContextMetrics`]. Rates are fractions in `0.0..=1.0` of
/// `total_contexts_built`, which counts cache hits too. A compaction is
/// counted once, when the context is built, not again when it is served
/// from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetricsSnapshot {
    pub total_contexts_built: u64,
    pub cache_hits: u64,
    pub optimizations_applied: u64,
    pub budget_rejections: u64,
    pub average_token_usage: f64,
    pub optimization_rate: f64,
    pub cache_hit_rate: f64,
}

impl ContextMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_built(&self, token_count: usize, optimization_applied: bool) {
        self.built.fetch_add(1, Ordering::Relaxed);
        self.token_sum.fetch_add(token_count as u64, Ordering::Relaxed);
        if optimization_applied {
            self.optimizations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self, token_count: usize) {
        self.built.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.token_sum.fetch_add(token_count as u64, Ordering::Relaxed);
    }

    pub fn record_budget_rejection(&self) {
        self.budget_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ContextMetricsSnapshot {
        let built = self.built.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let optimizations = self.optimizations.load(Ordering::Relaxed);
        let token_sum = self.token_sum.load(Ordering::Relaxed);

        let ratio = |n: u64| if built == 0 { 0.0 } else { n as f64 / built as f64 };

        ContextMetricsSnapshot {
            total_contexts_built: built,
            cache_hits,
            optimizations_applied: optimizations,
            budget_rejections: self.budget_rejections.load(Ordering::Relaxed),
            average_token_usage: ratio(token_sum),
            optimization_rate: ratio(optimizations),
            cache_hit_rate: ratio(cache_hits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_snapshot_has_zero_rates() {
        let snapshot = ContextMetrics::new().snapshot();
        assert_eq!(snapshot.total_contexts_built, 0);
        assert_eq!(snapshot.average_token_usage, 0.0);
        assert_eq!(snapshot.cache_hit_rate, 0.0);
    }

    #[test]
    fn test_rates_and_average() {
        let metrics = ContextMetrics::new();
        metrics.record_built(12_000, true);
        metrics.record_built(4_000, false);
        metrics.record_cache_hit(4_000);
        metrics.record_cache_hit(0);
        metrics.record_budget_rejection();

        assert_eq!(
            metrics.snapshot(),
            ContextMetricsSnapshot {
                total_contexts_built: 4,
                cache_hits: 2,
                optimizations_applied: 1,
                budget_rejections: 1,
                average_token_usage: 5_000.0,
                optimization_rate: 0.25,
                cache_hit_rate: 0.5,
            }
        );
    }

    #[test]
    fn test_cache_hit_of_compacted_context_is_not_another_optimization() {
        let metrics = ContextMetrics::new();
        metrics.record_built(9_000, true);
        metrics.record_cache_hit(9_000);
        metrics.record_cache_hit(9_000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_contexts_built, 3);
        assert_eq!(snapshot.optimizations_applied, 1);
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.average_token_usage, 9_000.0);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use crate::atomic_f64::AtomicF64;

/// Process-wide, atomic. Seeded at construction and never persisted — a
/// restart resets every counter.
#[derive(Default)]
pub struct SchedulerMetrics {
    select_total: AtomicU64,
    sticky_previous_hit_total: AtomicU64,
    sticky_session_hit_total: AtomicU64,
    load_balance_select_total: AtomicU64,
    account_switch_total: AtomicU64,
    latency_total_ns: AtomicU64,
    latency_count: AtomicU64,
    circuit_breaker_open_total: AtomicU64,
    circuit_breaker_recover_total: AtomicU64,
    sticky_release_error_total: AtomicU64,
    sticky_release_circuit_open_total: AtomicU64,
    load_skew_sum: AtomicF64,
    load_skew_count: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerMetricsSnapshot {
    pub select_total: u64,
    pub sticky_previous_hit_total: u64,
    pub sticky_session_hit_total: u64,
    pub load_balance_select_total: u64,
    pub account_switch_total: u64,
    pub scheduler_latency_ms_total: f64,
    pub scheduler_latency_ms_avg: f64,
    pub sticky_hit_ratio: f64,
    pub account_switch_rate: f64,
    pub load_skew_avg: f64,
    pub circuit_breaker_open_total: u64,
    pub circuit_breaker_recover_total: u64,
    pub sticky_release_error_total: u64,
    pub sticky_release_circuit_open_total: u64,
    pub runtime_stats_account_count: usize,
}

impl SchedulerMetrics {
    pub fn record_select(&self, latency_ns: u64) {
        self.select_total.fetch_add(1, Ordering::Relaxed);
        self.latency_total_ns.fetch_add(latency_ns, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sticky_previous_hit(&self) {
        self.sticky_previous_hit_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sticky_session_hit(&self) {
        self.sticky_session_hit_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_balance_select(&self, load_skew: f64) {
        self.load_balance_select_total.fetch_add(1, Ordering::Relaxed);
        self.load_skew_sum.add(load_skew);
        self.load_skew_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_account_switch(&self) {
        self.account_switch_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_open(&self) {
        self.circuit_breaker_open_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_recover(&self) {
        self.circuit_breaker_recover_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sticky_release_error(&self) {
        self.sticky_release_error_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sticky_release_circuit_open(&self) {
        self.sticky_release_circuit_open_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, runtime_stats_account_count: usize) -> SchedulerMetricsSnapshot {
        let select_total = self.select_total.load(Ordering::Relaxed);
        let sticky_previous = self.sticky_previous_hit_total.load(Ordering::Relaxed);
        let sticky_session = self.sticky_session_hit_total.load(Ordering::Relaxed);
        let load_balance = self.load_balance_select_total.load(Ordering::Relaxed);
        let switches = self.account_switch_total.load(Ordering::Relaxed);
        let lat_total_ns = self.latency_total_ns.load(Ordering::Relaxed);
        let lat_count = self.latency_count.load(Ordering::Relaxed);
        let skew_sum = self.load_skew_sum.load();
        let skew_count = self.load_skew_count.load(Ordering::Relaxed);

        SchedulerMetricsSnapshot {
            select_total,
            sticky_previous_hit_total: sticky_previous,
            sticky_session_hit_total: sticky_session,
            load_balance_select_total: load_balance,
            account_switch_total: switches,
            scheduler_latency_ms_total: lat_total_ns as f64 / 1e6,
            scheduler_latency_ms_avg: if lat_count > 0 {
                (lat_total_ns as f64 / lat_count as f64) / 1e6
            } else {
                0.0
            },
            sticky_hit_ratio: if select_total > 0 {
                (sticky_previous + sticky_session) as f64 / select_total as f64
            } else {
                0.0
            },
            account_switch_rate: if select_total > 0 {
                switches as f64 / select_total as f64
            } else {
                0.0
            },
            load_skew_avg: if skew_count > 0 {
                skew_sum / skew_count as f64
            } else {
                0.0
            },
            circuit_breaker_open_total: self.circuit_breaker_open_total.load(Ordering::Relaxed),
            circuit_breaker_recover_total: self
                .circuit_breaker_recover_total
                .load(Ordering::Relaxed),
            sticky_release_error_total: self.sticky_release_error_total.load(Ordering::Relaxed),
            sticky_release_circuit_open_total: self
                .sticky_release_circuit_open_total
                .load(Ordering::Relaxed),
            runtime_stats_account_count,
        }
    }
}

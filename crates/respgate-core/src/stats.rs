use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::atomic_f64::AtomicF64;
use crate::config::CircuitBreakerConfig;
use crate::shard::ShardedMap;

pub const ALPHA_FAST: f64 = 0.5;
pub const ALPHA_SLOW: f64 = 0.1;

/// Two EWMA channels over the same sample stream: a fast one that reacts
/// immediately to degradation and a slow one that only confirms recovery
/// once it has caught up. `snapshot()` always returns the pessimistic
/// (max) envelope of the two.
#[derive(Debug)]
pub struct DualEwma {
    fast: AtomicF64,
    slow: AtomicF64,
    samples: AtomicU64,
    /// When true, the first sample overwrites both channels directly
    /// instead of blending against a synthetic zero start (used for TTFT,
    /// which has no meaningful zero).
    nan_seeded: bool,
}

impl DualEwma {
    pub fn zero_seeded() -> Self {
        Self {
            fast: AtomicF64::new(0.0),
            slow: AtomicF64::new(0.0),
            samples: AtomicU64::new(0),
            nan_seeded: false,
        }
    }

    pub fn nan_seeded() -> Self {
        Self {
            fast: AtomicF64::new(f64::NAN),
            slow: AtomicF64::new(f64::NAN),
            samples: AtomicU64::new(0),
            nan_seeded: true,
        }
    }

    pub fn update(&self, sample: f64) -> f64 {
        self.samples.fetch_add(1, Ordering::Relaxed);
        if self.nan_seeded {
            self.fast.update(|old| {
                if old.is_nan() {
                    sample
                } else {
                    ALPHA_FAST * sample + (1.0 - ALPHA_FAST) * old
                }
            });
            self.slow.update(|old| {
                if old.is_nan() {
                    sample
                } else {
                    ALPHA_SLOW * sample + (1.0 - ALPHA_SLOW) * old
                }
            });
        } else {
            self.fast
                .update(|old| ALPHA_FAST * sample + (1.0 - ALPHA_FAST) * old);
            self.slow
                .update(|old| ALPHA_SLOW * sample + (1.0 - ALPHA_SLOW) * old);
        }
        self.snapshot()
    }

    /// Pessimistic envelope: the higher of the two channels. NaN (no
    /// sample yet) is treated as absent, not as a value.
    pub fn snapshot(&self) -> f64 {
        let (f, s) = (self.fast.load(), self.slow.load());
        match (f.is_nan(), s.is_nan()) {
            (true, true) => f64::NAN,
            (true, false) => s,
            (false, true) => f,
            (false, false) => f.max(s),
        }
    }

    pub fn fast(&self) -> f64 {
        self.fast.load()
    }

    pub fn slow(&self) -> f64 {
        self.slow.load()
    }

    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn has_sample(&self) -> bool {
        !self.snapshot().is_nan()
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Per-account three-state circuit breaker. Every field is an atomic and
/// every transition goes through a CAS on `state`, so `allow()` is safe to
/// call from arbitrarily many concurrent selections.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_fails: AtomicU32,
    last_failure_ns: AtomicU64,
    half_open_in_flight: AtomicU32,
    half_open_admitted: AtomicU32,
    half_open_success: AtomicU32,
    created_at: Instant,
    fail_threshold: u32,
    cooldown: Duration,
    half_open_max: u32,
}

impl CircuitBreaker {
    pub fn new(cfg: &CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_fails: AtomicU32::new(0),
            last_failure_ns: AtomicU64::new(0),
            half_open_in_flight: AtomicU32::new(0),
            half_open_admitted: AtomicU32::new(0),
            half_open_success: AtomicU32::new(0),
            created_at: Instant::now(),
            fail_threshold: cfg.fail_threshold.max(1),
            cooldown: Duration::from_secs(cfg.cooldown_seconds),
            half_open_max: cfg.half_open_max.max(1),
        }
    }

    fn now_ns(&self) -> u64 {
        self.created_at.elapsed().as_nanos() as u64
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn reset_half_open_counters(&self) {
        self.half_open_in_flight.store(0, Ordering::Release);
        self.half_open_admitted.store(0, Ordering::Release);
        self.half_open_success.store(0, Ordering::Release);
    }

    /// Returns true if a request may proceed against this account right
    /// now. A HALF_OPEN `true` consumes one probe permit — release it via
    /// [`Self::release_half_open_permit`] if the caller ends up not using
    /// it (e.g. a better candidate was chosen instead).
    pub fn allow(&self) -> bool {
        loop {
            match self.state() {
                CircuitState::Closed => return true,
                CircuitState::Open => {
                    let elapsed_ns = self.now_ns().saturating_sub(self.last_failure_ns.load(Ordering::Acquire));
                    if elapsed_ns < self.cooldown.as_nanos() as u64 {
                        return false;
                    }
                    // Reset counters before flipping state so no racing
                    // reader observes HALF_OPEN with stale counters.
                    self.reset_half_open_counters();
                    if self
                        .state
                        .compare_exchange(
                            CircuitState::Open as u8,
                            CircuitState::HalfOpen as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        continue;
                    }
                    // Someone else transitioned first; retry the loop.
                }
                CircuitState::HalfOpen => {
                    let admitted = self.half_open_admitted.fetch_add(1, Ordering::AcqRel) + 1;
                    if admitted > self.half_open_max {
                        self.half_open_admitted.fetch_sub(1, Ordering::AcqRel);
                        return false;
                    }
                    self.half_open_in_flight.fetch_add(1, Ordering::AcqRel);
                    return true;
                }
            }
        }
    }

    pub fn release_half_open_permit(&self) {
        let _ = self
            .half_open_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn report_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.consecutive_fails.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                self.release_half_open_permit();
                let successes = self.half_open_success.fetch_add(1, Ordering::AcqRel) + 1;
                let admitted = self.half_open_admitted.load(Ordering::Acquire);
                if admitted > 0 && successes >= admitted {
                    self.reset_half_open_counters();
                    self.state
                        .store(CircuitState::Closed as u8, Ordering::Release);
                    self.consecutive_fails.store(0, Ordering::Release);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn report_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let fails = self.consecutive_fails.fetch_add(1, Ordering::AcqRel) + 1;
                if fails >= self.fail_threshold {
                    self.last_failure_ns.store(self.now_ns(), Ordering::Release);
                    self.state.store(CircuitState::Open as u8, Ordering::Release);
                }
            }
            CircuitState::HalfOpen => {
                self.release_half_open_permit();
                self.last_failure_ns.store(self.now_ns(), Ordering::Release);
                self.reset_half_open_counters();
                self.state.store(CircuitState::Open as u8, Ordering::Release);
            }
            CircuitState::Open => {
                self.last_failure_ns.store(self.now_ns(), Ordering::Release);
            }
        }
    }

    pub fn half_open_in_flight(&self) -> u32 {
        self.half_open_in_flight.load(Ordering::Acquire)
    }
}

const TREND_RING_CAP: usize = 10;

/// Ring buffer of recent `(t_ns, rate)` load samples; `slope()` fits an
/// ordinary-least-squares line through it.
#[derive(Debug, Default)]
struct LoadTrendRing {
    samples: VecDeque<(u64, f64)>,
}

impl LoadTrendRing {
    fn push(&mut self, t_ns: u64, rate: f64) {
        if self.samples.len() == TREND_RING_CAP {
            self.samples.pop_front();
        }
        self.samples.push_back((t_ns, rate));
    }

    fn slope(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let t0 = self.samples[0].0;
        let xs: Vec<f64> = self
            .samples
            .iter()
            .map(|(t, _)| (*t as f64 - t0 as f64) / 1e9)
            .collect();
        let ys: Vec<f64> = self.samples.iter().map(|(_, r)| *r).collect();
        let n = xs.len() as f64;
        let x_mean = xs.iter().sum::<f64>() / n;
        let y_mean = ys.iter().sum::<f64>() / n;
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..xs.len() {
            num += (xs[i] - x_mean) * (ys[i] - y_mean);
            den += (xs[i] - x_mean).powi(2);
        }
        if den == 0.0 {
            0.0
        } else {
            num / den
        }
    }
}

const PER_MODEL_EVICT_EVERY: u64 = 100;
const IDLE_GC_EVERY: u64 = 1000;
const WARM_UP_SAMPLES: u64 = 5;
const PER_MODEL_TTL: Duration = Duration::from_secs(3600);
const IDLE_EVICT_AFTER: Duration = Duration::from_secs(3600);

struct PerModelEntry {
    ewma: DualEwma,
    last_update: Mutex<Instant>,
}

/// Per-account health signals: dual-EWMA error rate, global + per-model
/// TTFT, load trend, and the circuit breaker gating admission.
pub struct AccountRuntimeStat {
    pub error_rate: DualEwma,
    pub ttft: DualEwma,
    per_model_ttft: Mutex<std::collections::HashMap<String, PerModelEntry>>,
    trend: Mutex<LoadTrendRing>,
    pub circuit: CircuitBreaker,
    last_report: Mutex<Instant>,
    report_count: AtomicU64,
    created_at: Instant,
}

impl AccountRuntimeStat {
    fn new(cb_cfg: &CircuitBreakerConfig) -> Self {
        Self {
            error_rate: DualEwma::zero_seeded(),
            ttft: DualEwma::nan_seeded(),
            per_model_ttft: Mutex::new(std::collections::HashMap::new()),
            trend: Mutex::new(LoadTrendRing::default()),
            circuit: CircuitBreaker::new(cb_cfg),
            last_report: Mutex::new(Instant::now()),
            report_count: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn is_warmed_up(&self) -> bool {
        self.error_rate.sample_count() >= WARM_UP_SAMPLES
    }

    fn touch(&self) {
        *self.last_report.lock().unwrap() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_report.lock().unwrap().elapsed()
    }
}

/// Owns every `AccountRuntimeStat`, keyed by account id. Sharded to avoid a
/// single global lock on the hot report path.
pub struct RuntimeStats {
    shards: ShardedMap<String, std::sync::Arc<AccountRuntimeStat>>,
    cb_config: CircuitBreakerConfig,
    per_model_cfg: crate::config::PerModelTtftConfig,
    trend_enabled: bool,
}

impl RuntimeStats {
    pub fn new(scheduler_cfg: &crate::config::SchedulerConfig) -> Self {
        Self {
            shards: ShardedMap::new(64),
            cb_config: scheduler_cfg.circuit_breaker.clone(),
            per_model_cfg: scheduler_cfg.per_model_ttft.clone(),
            trend_enabled: scheduler_cfg.trend.enabled,
        }
    }

    fn entry(&self, account_id: &str) -> std::sync::Arc<AccountRuntimeStat> {
        self.shards.get_or_insert_with(account_id.to_string(), || {
            std::sync::Arc::new(AccountRuntimeStat::new(&self.cb_config))
        })
    }

    pub fn circuit_for(&self, account_id: &str) -> std::sync::Arc<AccountRuntimeStat> {
        self.entry(account_id)
    }

    pub fn report(
        &self,
        account_id: &str,
        success: bool,
        ttft_ms: Option<f64>,
        model: Option<&str>,
    ) {
        let stat = self.entry(account_id);
        stat.error_rate.update(if success { 0.0 } else { 1.0 });
        if success {
            stat.circuit.report_success();
        } else {
            stat.circuit.report_failure();
        }
        if let Some(ttft) = ttft_ms {
            stat.ttft.update(ttft);
            if self.per_model_cfg.enabled {
                if let Some(model) = model {
                    let mut map = stat.per_model_ttft.lock().unwrap();
                    if !map.contains_key(model) && map.len() >= self.per_model_cfg.max_models {
                        // Cap reached: drop the stalest entry to make room.
                        if let Some(stalest) = map
                            .iter()
                            .min_by_key(|(_, e)| *e.last_update.lock().unwrap())
                            .map(|(k, _)| k.clone())
                        {
                            map.remove(&stalest);
                        }
                    }
                    let entry = map.entry(model.to_string()).or_insert_with(|| PerModelEntry {
                        ewma: DualEwma::nan_seeded(),
                        last_update: Mutex::new(Instant::now()),
                    });
                    entry.ewma.update(ttft);
                    *entry.last_update.lock().unwrap() = Instant::now();
                }
            }
        }
        stat.touch();
        let count = stat.report_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % PER_MODEL_EVICT_EVERY == 0 {
            self.evict_stale_per_model(&stat);
        }
        if count % IDLE_GC_EVERY == 0 {
            self.gc_idle_accounts();
        }
    }

    fn evict_stale_per_model(&self, stat: &AccountRuntimeStat) {
        let mut map = stat.per_model_ttft.lock().unwrap();
        map.retain(|_, e| e.last_update.lock().unwrap().elapsed() < PER_MODEL_TTL);
    }

    fn gc_idle_accounts(&self) {
        self.shards
            .retain(|_, stat| stat.idle_for() < IDLE_EVICT_AFTER);
    }

    /// `error_rate`, `ttft`, `has_ttft` for the given account/model.
    pub fn snapshot(&self, account_id: &str, model: Option<&str>) -> (f64, f64, bool) {
        let stat = self.entry(account_id);
        let error_rate = stat.error_rate.snapshot();
        if let Some(model) = model {
            let map = stat.per_model_ttft.lock().unwrap();
            if let Some(entry) = map.get(model) {
                let v = entry.ewma.snapshot();
                if !v.is_nan() {
                    return (error_rate, v, true);
                }
            }
        }
        let global = stat.ttft.snapshot();
        if global.is_nan() {
            (error_rate, 0.0, false)
        } else {
            (error_rate, global, true)
        }
    }

    pub fn is_warmed_up(&self, account_id: &str) -> bool {
        self.entry(account_id).is_warmed_up()
    }

    pub fn record_load_sample(&self, account_id: &str, rate: f64) {
        if !self.trend_enabled {
            return;
        }
        let stat = self.entry(account_id);
        let now_ns = stat.created_at.elapsed().as_nanos() as u64;
        stat.trend.lock().unwrap().push(now_ns, rate);
    }

    pub fn load_trend_slope(&self, account_id: &str) -> f64 {
        self.entry(account_id).trend.lock().unwrap().slope()
    }

    pub fn account_count(&self) -> usize {
        self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_ewma_matches_closed_form() {
        let ewma = DualEwma::zero_seeded();
        let mut expected = 0.0;
        for _ in 0..5 {
            expected = ALPHA_FAST * 1.0 + (1.0 - ALPHA_FAST) * expected;
            ewma.update(1.0);
            assert!((ewma.fast() - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn snapshot_is_pessimistic_envelope() {
        let ewma = DualEwma::zero_seeded();
        ewma.update(1.0);
        assert!(ewma.snapshot() >= ewma.fast());
        assert!(ewma.snapshot() >= ewma.slow());
    }

    #[test]
    fn circuit_opens_after_threshold_and_blocks_until_cooldown() {
        let cfg = CircuitBreakerConfig {
            enabled: true,
            fail_threshold: 3,
            cooldown_seconds: 3600,
            half_open_max: 2,
        };
        let cb = CircuitBreaker::new(&cfg);
        assert!(cb.allow());
        cb.report_failure();
        cb.report_failure();
        assert!(cb.allow());
        cb.report_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn half_open_admits_bounded_probes_and_closes_on_success() {
        let cfg = CircuitBreakerConfig {
            enabled: true,
            fail_threshold: 1,
            cooldown_seconds: 0,
            half_open_max: 2,
        };
        let cb = CircuitBreaker::new(&cfg);
        cb.report_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // cooldown is 0s so the next allow() flips to half-open immediately
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow());
        assert!(!cb.allow()); // third probe exceeds half_open_max
        assert!(cb.half_open_in_flight() <= 2);
        cb.report_success();
        cb.report_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let cfg = CircuitBreakerConfig {
            enabled: true,
            fail_threshold: 1,
            cooldown_seconds: 0,
            half_open_max: 2,
        };
        let cb = CircuitBreaker::new(&cfg);
        cb.report_failure();
        assert!(cb.allow());
        cb.report_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn trend_slope_zero_with_fewer_than_two_samples() {
        let mut ring = LoadTrendRing::default();
        assert_eq!(ring.slope(), 0.0);
        ring.push(0, 10.0);
        assert_eq!(ring.slope(), 0.0);
    }

    #[test]
    fn trend_slope_detects_rising_load() {
        let mut ring = LoadTrendRing::default();
        for i in 0..5u64 {
            ring.push(i * 1_000_000_000, i as f64 * 10.0);
        }
        assert!(ring.slope() > 0.0);
    }
}

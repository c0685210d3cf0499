use std::time::Duration;

use serde::Deserialize;

/// Every tunable named in the external-interfaces configuration table.
/// Populated by a host binary (config loading itself is out of scope) and
/// handed around as `Arc<GatewayConfig>` — immutable after construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub ws: WsFeatureFlags,
    pub pool: PoolConfig,
    pub timeouts: TimeoutConfig,
    pub sticky: StickyConfig,
    pub scheduler: SchedulerConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws: WsFeatureFlags::default(),
            pool: PoolConfig::default(),
            timeouts: TimeoutConfig::default(),
            sticky: StickyConfig::default(),
            scheduler: SchedulerConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub retry_limit: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            jitter_ratio: 0.2,
        }
    }
}

impl ReconnectConfig {
    /// Exponential backoff capped at `max_backoff_ms`, full jitter scaled by
    /// `jitter_ratio` so a thundering-herd reconnect doesn't resync.
    pub fn backoff_for_attempt(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let exp = self.initial_backoff_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.max_backoff_ms) as f64;
        let jitter = capped * self.jitter_ratio * jitter_unit.clamp(0.0, 1.0);
        Duration::from_millis((capped + jitter) as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WsFeatureFlags {
    pub enabled: bool,
    pub oauth_enabled: bool,
    pub api_key_enabled: bool,
    pub responses_websockets_v2: bool,
    pub store_disabled_force_new_conn: bool,
    pub prewarm_generate_enabled: bool,
}

impl Default for WsFeatureFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            oauth_enabled: true,
            api_key_enabled: true,
            responses_websockets_v2: true,
            store_disabled_force_new_conn: true,
            prewarm_generate_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_conns_per_account: u32,
    pub min_idle_per_account: u32,
    pub max_idle_per_account: u32,
    pub queue_limit_per_conn: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_conns_per_account: 16,
            min_idle_per_account: 1,
            max_idle_per_account: 8,
            queue_limit_per_conn: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub dial_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_timeout_seconds: 10,
            read_timeout_seconds: 30,
            write_timeout_seconds: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn dial(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_seconds)
    }
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StickyConfig {
    pub session_ttl_seconds: u64,
    pub response_id_ttl_seconds: u64,
    pub session_hash_read_old_fallback: bool,
    pub session_hash_dual_write_old: bool,
    pub sticky_session_max_waiting: u32,
}

impl StickyConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn response_id_ttl(&self) -> Duration {
        Duration::from_secs(self.response_id_ttl_seconds)
    }
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: 3600,
            response_id_ttl_seconds: 600,
            session_hash_read_old_fallback: false,
            session_hash_dual_write_old: false,
            sticky_session_max_waiting: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub priority: f64,
    pub load: f64,
    pub queue: f64,
    pub error_rate: f64,
    pub ttft: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            priority: 0.2,
            load: 0.3,
            queue: 0.2,
            error_rate: 0.2,
            ttft: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub fail_threshold: u32,
    pub cooldown_seconds: u64,
    pub half_open_max: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_threshold: 5,
            cooldown_seconds: 30,
            half_open_max: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerModelTtftConfig {
    pub enabled: bool,
    pub max_models: usize,
}

impl Default for PerModelTtftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_models: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub enabled: bool,
    pub max_slope: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_slope: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StickyReleaseConfig {
    pub enabled: bool,
    pub error_threshold: f64,
}

impl Default for StickyReleaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            error_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub lb_top_k: usize,
    pub p2c_enabled: bool,
    pub softmax_enabled: bool,
    pub softmax_temperature: f64,
    pub weights: ScoreWeights,
    pub circuit_breaker: CircuitBreakerConfig,
    pub per_model_ttft: PerModelTtftConfig,
    pub trend: TrendConfig,
    pub sticky_release: StickyReleaseConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lb_top_k: 3,
            p2c_enabled: false,
            softmax_enabled: false,
            softmax_temperature: 0.3,
            weights: ScoreWeights::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            per_model_ttft: PerModelTtftConfig::default(),
            trend: TrendConfig::default(),
            sticky_release: StickyReleaseConfig::default(),
        }
    }
}

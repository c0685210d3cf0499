pub mod metrics;
pub mod policy;
pub mod score;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::account::{Account, AccountKind};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::limiter::{ConcurrencyLimiter, Lease, WaitingGuard};
use crate::stats::{CircuitState, RuntimeStats};
use crate::sticky::StickyStore;

pub use metrics::{SchedulerMetrics, SchedulerMetricsSnapshot};
use score::CandidateInput;

#[derive(Debug, Clone, Default)]
pub struct ScheduleRequest {
    pub group_id: Option<String>,
    pub session_hash: Option<String>,
    pub legacy_session_hash: Option<String>,
    pub sticky_account_id: Option<String>,
    pub previous_response_id: Option<String>,
    pub requested_model: Option<String>,
    pub required_ws: bool,
    pub excluded_ids: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionLayer {
    PreviousResponse,
    SessionSticky,
    LoadBalance,
}

#[derive(Debug, Clone)]
pub struct ScheduleDecision {
    pub layer: SelectionLayer,
    pub candidate_count: usize,
    pub top_k: usize,
    pub latency_ms: f64,
    pub load_skew: f64,
    pub selected_account_id: Option<String>,
    pub selected_account_type: Option<AccountKind>,
    pub sticky_previous_hit: bool,
    pub sticky_session_hit: bool,
}

/// Returned when the scheduler picked an account but every connection for
/// it was already at its concurrency cap; the caller should queue the
/// request rather than force a different account.
pub struct WaitPlan {
    pub account_id: String,
    pub timeout: Duration,
    pub max_waiting: u32,
    guard: WaitingGuard,
}

impl WaitPlan {
    /// Releases the registered waiting slot; called when the caller gives
    /// up on the wait (timeout, cancellation) without a retried select.
    pub fn abandon(&self) {
        self.guard.release();
    }
}

pub enum SelectOutcome {
    Selected {
        account_id: String,
        /// `None` only for an L1 previous_response_id hit — a direct
        /// continuation of an in-flight conversation is not subject to
        /// the concurrency limiter.
        lease: Option<Lease>,
    },
    Wait(WaitPlan),
}

/// C4: the account scheduler. Owns no account data itself — each `select`
/// call is handed the caller's already-resolved, already-group-filtered
/// account snapshot.
pub struct Scheduler {
    cfg: Arc<GatewayConfig>,
    pub sticky: StickyStore,
    pub stats: RuntimeStats,
    pub limiter: ConcurrencyLimiter,
    pub metrics: SchedulerMetrics,
}

impl Scheduler {
    pub fn new(cfg: Arc<GatewayConfig>) -> Self {
        let stats = RuntimeStats::new(&cfg.scheduler);
        let sticky = StickyStore::new(
            64,
            cfg.sticky.session_hash_read_old_fallback,
            cfg.sticky.session_hash_dual_write_old,
        );
        Self {
            cfg,
            sticky,
            stats,
            limiter: ConcurrencyLimiter::new(),
            metrics: SchedulerMetrics::default(),
        }
    }

    pub fn report_result(
        &self,
        account_id: &str,
        success: bool,
        first_token_ms: Option<f64>,
        model: Option<&str>,
    ) {
        let was_open = self.stats.circuit_for(account_id).circuit.state() == CircuitState::Open;
        self.stats.report(account_id, success, first_token_ms, model);
        let stat = self.stats.circuit_for(account_id);
        let now_state = stat.circuit.state();
        if now_state == CircuitState::Open && !was_open {
            self.metrics.record_circuit_open();
            tracing::warn!(account_id, "circuit breaker opened");
        }
        if was_open && now_state != CircuitState::Open {
            self.metrics.record_circuit_recover();
            tracing::info!(account_id, "circuit breaker recovered");
        }
    }

    pub fn report_switch(&self) {
        self.metrics.record_account_switch();
    }

    pub fn metrics_snapshot(&self) -> SchedulerMetricsSnapshot {
        self.metrics.snapshot(self.stats.account_count())
    }

    #[tracing::instrument(skip(self, req, accounts), fields(group = req.group_id.as_deref().unwrap_or("")))]
    pub fn select(
        &self,
        req: &ScheduleRequest,
        accounts: &[Account],
    ) -> Result<(SelectOutcome, ScheduleDecision), GatewayError> {
        let start = Instant::now();
        let group = req.group_id.clone().unwrap_or_default();
        let by_id: HashMap<&str, &Account> = accounts.iter().map(|a| (a.id.as_str(), a)).collect();

        let mut result = self
            .try_previous_response(req, &group, &by_id)
            .or_else(|| self.try_session_sticky(req, &group, &by_id))
            .map(Ok)
            .unwrap_or_else(|| self.load_balance(req, &group, accounts));

        match &mut result {
            Ok((_, decision)) => {
                decision.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.metrics.record_select(start.elapsed().as_nanos() as u64);
                tracing::debug!(
                    layer = ?decision.layer,
                    account_id = decision.selected_account_id.as_deref(),
                    latency_ms = decision.latency_ms,
                    "scheduler selected account"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "scheduler found no eligible candidates");
            }
        }
        result
    }

    fn try_previous_response(
        &self,
        req: &ScheduleRequest,
        group: &str,
        by_id: &HashMap<&str, &Account>,
    ) -> Option<(SelectOutcome, ScheduleDecision)> {
        let prev = req.previous_response_id.as_deref()?;
        if prev.is_empty() {
            return None;
        }
        let account_id = self.sticky.get_response_account(group, prev)?;
        let account = *by_id.get(account_id.as_str())?;
        if req.excluded_ids.contains(&account_id) {
            return None;
        }
        if req.required_ws && !account.supports_ws {
            return None;
        }
        if !account.model_compatible(req.requested_model.as_deref()) {
            return None;
        }

        if let Some(session_hash) = req.session_hash.as_deref().filter(|s| !s.is_empty()) {
            self.sticky.bind_session_account(
                group,
                session_hash,
                req.legacy_session_hash.as_deref(),
                &account_id,
                self.cfg.sticky.session_ttl(),
            );
        }

        self.metrics.record_sticky_previous_hit();
        Some((
            SelectOutcome::Selected {
                account_id: account_id.clone(),
                lease: None,
            },
            ScheduleDecision {
                layer: SelectionLayer::PreviousResponse,
                candidate_count: 1,
                top_k: 0,
                latency_ms: 0.0,
                load_skew: 0.0,
                selected_account_id: Some(account_id),
                selected_account_type: Some(account.kind),
                sticky_previous_hit: true,
                sticky_session_hit: false,
            },
        ))
    }

    fn try_session_sticky(
        &self,
        req: &ScheduleRequest,
        group: &str,
        by_id: &HashMap<&str, &Account>,
    ) -> Option<(SelectOutcome, ScheduleDecision)> {
        let session_hash = req.session_hash.as_deref().filter(|s| !s.is_empty())?;
        let account_id = req.sticky_account_id.clone().or_else(|| {
            self.sticky
                .get_session_account(group, session_hash, req.legacy_session_hash.as_deref())
        })?;
        let account = *by_id.get(account_id.as_str())?;
        if req.excluded_ids.contains(&account_id) || !account.model_compatible(req.requested_model.as_deref())
        {
            return None;
        }

        let stat = self.stats.circuit_for(&account_id);
        let cb_open = stat.circuit.state() == CircuitState::Open;
        let (error_rate, _, _) = self.stats.snapshot(&account_id, req.requested_model.as_deref());
        let warmed = self.stats.is_warmed_up(&account_id);
        let release_cfg = &self.cfg.scheduler.sticky_release;
        let error_release = release_cfg.enabled && warmed && error_rate > release_cfg.error_threshold;

        if cb_open {
            self.metrics.record_sticky_release_circuit_open();
            return None;
        }
        if error_release {
            self.metrics.record_sticky_release_error();
            return None;
        }

        if let Some(lease) = self.limiter.try_acquire(&account_id, account.concurrency) {
            self.sticky
                .refresh_session_account_ttl(group, session_hash, self.cfg.sticky.session_ttl());
            self.metrics.record_sticky_session_hit();
            return Some((
                SelectOutcome::Selected {
                    account_id: account_id.clone(),
                    lease: Some(lease),
                },
                ScheduleDecision {
                    layer: SelectionLayer::SessionSticky,
                    candidate_count: 1,
                    top_k: 0,
                    latency_ms: 0.0,
                    load_skew: 0.0,
                    selected_account_id: Some(account_id),
                    selected_account_type: Some(account.kind),
                    sticky_previous_hit: false,
                    sticky_session_hit: true,
                },
            ));
        }

        let max_waiting = self.cfg.sticky.sticky_session_max_waiting;
        if self.limiter.waiting_count(&account_id) < max_waiting {
            let guard = self.limiter.mark_waiting(&account_id);
            self.metrics.record_sticky_session_hit();
            return Some((
                SelectOutcome::Wait(WaitPlan {
                    account_id: account_id.clone(),
                    timeout: self.cfg.timeouts.dial(),
                    max_waiting,
                    guard,
                }),
                ScheduleDecision {
                    layer: SelectionLayer::SessionSticky,
                    candidate_count: 1,
                    top_k: 0,
                    latency_ms: 0.0,
                    load_skew: 0.0,
                    selected_account_id: Some(account_id),
                    selected_account_type: Some(account.kind),
                    sticky_previous_hit: false,
                    sticky_session_hit: true,
                },
            ));
        }

        // Waiting queue for the sticky account is full: fall through to L3.
        None
    }

    fn load_balance(
        &self,
        req: &ScheduleRequest,
        group: &str,
        accounts: &[Account],
    ) -> Result<(SelectOutcome, ScheduleDecision), GatewayError> {
        let mut candidates: Vec<&Account> = accounts
            .iter()
            .filter(|a| {
                a.schedulable
                    && a.platform == crate::account::Platform::OpenAi
                    && a.model_compatible(req.requested_model.as_deref())
                    && (!req.required_ws || a.supports_ws)
                    && !req.excluded_ids.contains(&a.id)
            })
            .collect();

        let mut half_open_consumed: Vec<String> = Vec::new();
        if self.cfg.scheduler.circuit_breaker.enabled {
            let filtered: Vec<&Account> = candidates
                .iter()
                .filter(|a| {
                    let admitted = self.stats.circuit_for(&a.id).circuit.allow();
                    if admitted {
                        half_open_consumed.push(a.id.clone());
                    }
                    admitted
                })
                .cloned()
                .collect();
            if !filtered.is_empty() {
                candidates = filtered;
            }
            // else: keep the unfiltered set (graceful degradation).
        }

        if candidates.is_empty() {
            return Err(GatewayError::SchedulerNoCandidates);
        }
        let candidate_count = candidates.len();

        let load_batch = self.limiter.load_batch(
            &candidates
                .iter()
                .map(|a| (a.id.clone(), a.concurrency))
                .collect::<Vec<_>>(),
        );
        for a in &candidates {
            self.stats.record_load_sample(&a.id, load_batch[&a.id].load_rate);
        }

        let candidate_inputs: Vec<CandidateInput> = candidates
            .iter()
            .map(|a| {
                let load_info = load_batch[&a.id];
                let (error_rate, ttft, has_ttft) =
                    self.stats.snapshot(&a.id, req.requested_model.as_deref());
                CandidateInput {
                    account_id: a.id.clone(),
                    priority: a.priority,
                    load_rate: load_info.load_rate,
                    waiting_count: load_info.waiting_count,
                    concurrency: a.concurrency,
                    error_rate,
                    ttft_ms: has_ttft.then_some(ttft),
                    load_trend_slope: self.stats.load_trend_slope(&a.id),
                }
            })
            .collect();

        let load_skew_val = score::load_skew(&candidate_inputs);
        let scored = score::score_candidates(
            &candidate_inputs,
            &self.cfg.scheduler.weights,
            &self.cfg.scheduler.trend,
        );

        let mut rng = policy::seed_rng(
            req.session_hash.as_deref().unwrap_or(""),
            req.previous_response_id.as_deref().unwrap_or(""),
            req.requested_model.as_deref().unwrap_or(""),
            group,
        );

        let (order, top_k) = if self.cfg.scheduler.softmax_enabled && scored.len() > 3 {
            (
                policy::softmax_order(scored, self.cfg.scheduler.softmax_temperature, &mut rng),
                0,
            )
        } else if self.cfg.scheduler.p2c_enabled {
            (policy::power_of_two_choices(scored, &mut rng), 0)
        } else {
            let k = self.cfg.scheduler.lb_top_k.min(scored.len()).max(1);
            let top = score::select_top_k(scored, k);
            (policy::weighted_without_replacement(top, &mut rng), k)
        };

        let by_id: HashMap<&str, &Account> = accounts.iter().map(|a| (a.id.as_str(), a)).collect();

        for cand in &order {
            let account = match by_id.get(cand.account_id.as_str()) {
                Some(a) => *a,
                None => continue,
            };
            if let Some(lease) = self.limiter.try_acquire(&cand.account_id, account.concurrency) {
                for id in &half_open_consumed {
                    if id != &cand.account_id {
                        self.stats.circuit_for(id).circuit.release_half_open_permit();
                    }
                }
                self.metrics.record_load_balance_select(load_skew_val);
                return Ok((
                    SelectOutcome::Selected {
                        account_id: cand.account_id.clone(),
                        lease: Some(lease),
                    },
                    ScheduleDecision {
                        layer: SelectionLayer::LoadBalance,
                        candidate_count,
                        top_k,
                        latency_ms: 0.0,
                        load_skew: load_skew_val,
                        selected_account_id: Some(cand.account_id.clone()),
                        selected_account_type: Some(account.kind),
                        sticky_previous_hit: false,
                        sticky_session_hit: false,
                    },
                ));
            }
        }

        for id in &half_open_consumed {
            self.stats.circuit_for(id).circuit.release_half_open_permit();
        }

        let best = order.first().ok_or(GatewayError::SchedulerNoCandidates)?;
        let guard = self.limiter.mark_waiting(&best.account_id);
        let account = *by_id
            .get(best.account_id.as_str())
            .ok_or(GatewayError::SchedulerNoCandidates)?;
        self.metrics.record_load_balance_select(load_skew_val);
        Ok((
            SelectOutcome::Wait(WaitPlan {
                account_id: best.account_id.clone(),
                timeout: self.cfg.timeouts.dial(),
                max_waiting: self.cfg.sticky.sticky_session_max_waiting,
                guard,
            }),
            ScheduleDecision {
                layer: SelectionLayer::LoadBalance,
                candidate_count,
                top_k,
                latency_ms: 0.0,
                load_skew: load_skew_val,
                selected_account_id: Some(best.account_id.clone()),
                selected_account_type: Some(account.kind),
                sticky_previous_hit: false,
                sticky_session_hit: false,
            },
        ))
    }
}

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::account::AccountLoadInfo;
use crate::shard::ShardedMap;

#[derive(Default)]
struct AccountSlot {
    in_flight: AtomicU32,
    waiting: AtomicU32,
}

/// Per-account semaphore with waiting-queue accounting. `try_acquire` never
/// blocks; callers that fail to acquire and decide to queue a `WaitPlan`
/// register that intent explicitly via [`ConcurrencyLimiter::mark_waiting`]
/// so `GetAccountWaitingCount` reflects reality.
pub struct ConcurrencyLimiter {
    slots: ShardedMap<String, Arc<AccountSlot>>,
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyLimiter {
    pub fn new() -> Self {
        Self {
            slots: ShardedMap::new(64),
        }
    }

    fn slot(&self, account_id: &str) -> Arc<AccountSlot> {
        self.slots
            .get_or_insert_with(account_id.to_string(), || Arc::new(AccountSlot::default()))
    }

    /// Non-blocking acquire. Succeeds only if `in_flight < max_concurrency`.
    pub fn try_acquire(&self, account_id: &str, max_concurrency: u32) -> Option<Lease> {
        let slot = self.slot(account_id);
        let mut current = slot.in_flight.load(Ordering::Acquire);
        loop {
            if current >= max_concurrency {
                return None;
            }
            match slot.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(Lease {
                        slot,
                        released: AtomicBool::new(false),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn mark_waiting(&self, account_id: &str) -> WaitingGuard {
        let slot = self.slot(account_id);
        slot.waiting.fetch_add(1, Ordering::AcqRel);
        WaitingGuard {
            slot,
            released: AtomicBool::new(false),
        }
    }

    pub fn waiting_count(&self, account_id: &str) -> u32 {
        self.slot(account_id).waiting.load(Ordering::Acquire)
    }

    pub fn in_flight(&self, account_id: &str) -> u32 {
        self.slot(account_id).in_flight.load(Ordering::Acquire)
    }

    /// Batched load snapshot for the supplied accounts, one round-trip.
    /// `max_concurrency` comes from the account snapshot; a concurrency of
    /// 0 maps to `load_rate = 0` to avoid division by zero.
    pub fn load_batch(
        &self,
        accounts: &[(String, u32)],
    ) -> std::collections::HashMap<String, AccountLoadInfo> {
        let mut out = std::collections::HashMap::with_capacity(accounts.len());
        for (account_id, max_concurrency) in accounts {
            let slot = self.slot(account_id);
            let in_flight = slot.in_flight.load(Ordering::Acquire);
            let waiting = slot.waiting.load(Ordering::Acquire);
            let load_rate = if *max_concurrency == 0 {
                0.0
            } else {
                100.0 * in_flight as f64 / *max_concurrency as f64
            };
            out.insert(
                account_id.clone(),
                AccountLoadInfo {
                    load_rate,
                    waiting_count: waiting,
                },
            );
        }
        out
    }
}

/// RAII guard for one acquired concurrency slot. `release()` is idempotent;
/// dropping without calling it releases exactly once as well.
pub struct Lease {
    slot: Arc<AccountSlot>,
    released: AtomicBool,
}

impl Lease {
    pub fn release(&self) {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.slot.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

/// RAII guard for a registered wait-plan slot.
pub struct WaitingGuard {
    slot: Arc<AccountSlot>,
    released: AtomicBool,
}

impl WaitingGuard {
    pub fn release(&self) {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.slot.waiting.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_blocks_past_max_concurrency() {
        let limiter = ConcurrencyLimiter::new();
        let l1 = limiter.try_acquire("a1", 1).expect("first acquire");
        assert!(limiter.try_acquire("a1", 1).is_none());
        drop(l1);
        assert!(limiter.try_acquire("a1", 1).is_some());
    }

    #[test]
    fn release_is_idempotent() {
        let limiter = ConcurrencyLimiter::new();
        let lease = limiter.try_acquire("a1", 2).unwrap();
        lease.release();
        lease.release();
        assert_eq!(limiter.in_flight("a1"), 0);
    }

    #[test]
    fn load_batch_computes_rate_and_waiting() {
        let limiter = ConcurrencyLimiter::new();
        let _l = limiter.try_acquire("a1", 4).unwrap();
        let _w = limiter.mark_waiting("a1");
        let batch = limiter.load_batch(&[("a1".to_string(), 4)]);
        let info = &batch["a1"];
        assert_eq!(info.load_rate, 25.0);
        assert_eq!(info.waiting_count, 1);
    }

    #[test]
    fn zero_concurrency_never_divides_by_zero() {
        let limiter = ConcurrencyLimiter::new();
        let batch = limiter.load_batch(&[("a1".to_string(), 0)]);
        assert_eq!(batch["a1"].load_rate, 0.0);
    }
}

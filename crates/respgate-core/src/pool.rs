use std::collections::HashMap;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use uuid_lite::new_conn_id;

use respgate_transport::WsStream;

use crate::config::GatewayConfig;
use crate::error::GatewayError;

mod uuid_lite {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    /// A process-unique connection id. Not a UUID — this pool has no need
    /// for global uniqueness, only per-process distinctness for logging
    /// and sticky `response_id→conn_id` lookups.
    pub fn new_conn_id(account_id: &str) -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{account_id}-conn-{n}")
    }
}

/// The compound bucket key from the design: connections are shared across
/// unrelated sessions only within the same `session_scope`, unless
/// `isolated` forces a dedicated connection per scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub account_id: String,
    pub session_scope: String,
    pub isolated: bool,
}

struct ConnHandle {
    id: String,
    account_id: String,
    session_scope: String,
    isolated: bool,
    created_at: Instant,
    last_used: Instant,
    ping_failures: u32,
    stream: WsStream,
    _permit: OwnedSemaphorePermit,
}

impl ConnHandle {
    fn is_stale(&self, max_idle_age: Duration) -> bool {
        self.last_used.elapsed() > max_idle_age
    }
}

#[derive(Default)]
struct PoolStatsAtomic {
    created_total: AtomicU64,
    evicted_total: AtomicU64,
    reused_total: AtomicU64,
    leased: AtomicU32,
}

struct AccountPool {
    account_id: String,
    semaphore: Arc<Semaphore>,
    idle_shared: Mutex<Vec<ConnHandle>>,
    idle_isolated: Mutex<HashMap<String, ConnHandle>>,
    max_idle: u32,
    stats: PoolStatsAtomic,
}

enum Returned {
    Shared(ConnHandle),
    Isolated(ConnHandle),
    Drop,
}

/// Maps a failed-handshake status into its specific typed error instead of
/// the blanket `GatewayError::Transport`.
fn classify_dial_error(e: respgate_transport::TransportError) -> GatewayError {
    match e {
        respgate_transport::TransportError::Handshake { status: 426 } => {
            GatewayError::WsUpgradeRequired {
                response_already_written: false,
            }
        }
        respgate_transport::TransportError::Handshake { status } if status == 401 || status == 403 => {
            GatewayError::WsAuth {
                response_already_written: false,
            }
        }
        other => GatewayError::Transport(other),
    }
}

/// C5: per-account bounded WebSocket connection pools. Dialing is the
/// caller's responsibility (urls/headers vary per request even for the
/// same account) — `acquire` takes a dial future factory and only manages
/// bookkeeping, idle reuse, and the lease lifecycle.
pub struct Pool {
    cfg: Arc<GatewayConfig>,
    accounts: Mutex<HashMap<String, Arc<AccountPool>>>,
    return_tx: mpsc::UnboundedSender<(String, Returned)>,
    return_rx: Mutex<mpsc::UnboundedReceiver<(String, Returned)>>,
}

impl Pool {
    pub fn new(cfg: Arc<GatewayConfig>) -> Self {
        let (return_tx, return_rx) = mpsc::unbounded_channel();
        Self {
            cfg,
            accounts: Mutex::new(HashMap::new()),
            return_tx,
            return_rx: Mutex::new(return_rx),
        }
    }

    fn account_pool(&self, account_id: &str) -> Arc<AccountPool> {
        let mut accounts = self.accounts.lock().unwrap();
        accounts
            .entry(account_id.to_string())
            .or_insert_with(|| {
                Arc::new(AccountPool {
                    account_id: account_id.to_string(),
                    semaphore: Arc::new(Semaphore::new(self.cfg.pool.max_conns_per_account as usize)),
                    idle_shared: Mutex::new(Vec::new()),
                    idle_isolated: Mutex::new(HashMap::new()),
                    max_idle: self.cfg.pool.max_idle_per_account,
                    stats: PoolStatsAtomic::default(),
                })
            })
            .clone()
    }

    /// Drains connections other leases returned since the last call,
    /// putting them back into their account's idle bucket.
    fn process_returns(&self) {
        let mut rx = self.return_rx.lock().unwrap();
        while let Ok((account_id, returned)) = rx.try_recv() {
            let pool = self.account_pool(&account_id);
            match returned {
                Returned::Shared(conn) => pool.idle_shared.lock().unwrap().push(conn),
                Returned::Isolated(conn) => {
                    pool.idle_isolated
                        .lock()
                        .unwrap()
                        .insert(conn.session_scope.clone(), conn);
                }
                Returned::Drop => {}
            }
        }
    }

    /// Acquires a lease for `key`, reusing `preferred_conn_id` or any idle
    /// connection in the bucket, dialing a new one (bounded by the
    /// account's semaphore) only if none is available.
    #[tracing::instrument(skip(self, dial), fields(account_id = %key.account_id, isolated = key.isolated))]
    pub async fn acquire<F, Fut>(
        &self,
        key: PoolKey,
        preferred_conn_id: Option<&str>,
        dial_timeout: Duration,
        dial: F,
    ) -> Result<Lease, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<WsStream, respgate_transport::TransportError>>,
    {
        self.process_returns();
        let pool = self.account_pool(&key.account_id);

        if let Some(conn) = self.take_idle(&pool, &key, preferred_conn_id) {
            pool.stats.reused_total.fetch_add(1, Ordering::Relaxed);
            pool.stats.leased.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(conn_id = %conn.id, "reused idle connection");
            return Ok(self.wrap_lease(pool, conn, key, false));
        }

        let permit = tokio::time::timeout(dial_timeout, pool.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                tracing::warn!(account_id = %key.account_id, "connection limit reached");
                GatewayError::WsConnectionLimit {
                    response_already_written: false,
                }
            })?
            .map_err(|_| GatewayError::WsUnavailable {
                response_already_written: false,
            })?;

        let stream = match tokio::time::timeout(dial_timeout, dial()).await {
            Err(_elapsed) => {
                tracing::warn!(account_id = %key.account_id, "dial timed out");
                return Err(GatewayError::WsUnavailable {
                    response_already_written: false,
                });
            }
            Ok(Err(e)) => {
                let mapped = classify_dial_error(e);
                tracing::warn!(account_id = %key.account_id, error = %mapped, "dial rejected");
                return Err(mapped);
            }
            Ok(Ok(stream)) => stream,
        };

        let conn = ConnHandle {
            id: new_conn_id(&key.account_id),
            account_id: key.account_id.clone(),
            session_scope: key.session_scope.clone(),
            isolated: key.isolated,
            created_at: Instant::now(),
            last_used: Instant::now(),
            ping_failures: 0,
            stream,
            _permit: permit,
        };
        pool.stats.created_total.fetch_add(1, Ordering::Relaxed);
        pool.stats.leased.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conn_id = %conn.id, "dialed new connection");
        Ok(self.wrap_lease(pool, conn, key, true))
    }

    fn take_idle(&self, pool: &AccountPool, key: &PoolKey, preferred: Option<&str>) -> Option<ConnHandle> {
        if key.isolated {
            let mut isolated = pool.idle_isolated.lock().unwrap();
            return isolated.remove(&key.session_scope);
        }
        let mut shared = pool.idle_shared.lock().unwrap();
        if let Some(id) = preferred {
            if let Some(pos) = shared.iter().position(|c| c.id == id) {
                return Some(shared.remove(pos));
            }
        }
        shared.pop()
    }

    fn wrap_lease(&self, pool: Arc<AccountPool>, conn: ConnHandle, key: PoolKey, freshly_dialed: bool) -> Lease {
        Lease {
            conn: Some(conn),
            key,
            pool,
            return_tx: self.return_tx.clone(),
            freshly_dialed,
        }
    }

    /// Closes a specific connection wherever it currently sits idle.
    pub fn evict_conn(&self, account_id: &str, conn_id: &str) {
        let pool = self.account_pool(account_id);
        let mut shared = pool.idle_shared.lock().unwrap();
        if let Some(pos) = shared.iter().position(|c| c.id == conn_id) {
            shared.remove(pos);
            pool.stats.evicted_total.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(shared);
        let mut isolated = pool.idle_isolated.lock().unwrap();
        isolated.retain(|_, c| {
            let keep = c.id != conn_id;
            if !keep {
                pool.stats.evicted_total.fetch_add(1, Ordering::Relaxed);
            }
            keep
        });
    }

    /// Pings every idle connection; evicts ones failing repeatedly.
    pub async fn health_check(&self, account_id: &str, max_consecutive_failures: u32) {
        self.process_returns();
        let pool = self.account_pool(account_id);
        let mut shared = pool.idle_shared.lock().unwrap();
        let mut still_healthy = Vec::with_capacity(shared.len());
        for mut conn in shared.drain(..) {
            match conn.stream.ping().await {
                Ok(()) => {
                    conn.ping_failures = 0;
                    still_healthy.push(conn);
                }
                Err(_) => {
                    conn.ping_failures += 1;
                    if conn.ping_failures < max_consecutive_failures {
                        still_healthy.push(conn);
                    } else {
                        tracing::warn!(conn_id = %conn.id, "evicting connection after repeated ping failures");
                        pool.stats.evicted_total.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        *shared = still_healthy;
    }

    /// Evicts idle connections that haven't been used within `max_idle_age`.
    pub fn cleanup_idle(&self, account_id: &str, max_idle_age: Duration, min_idle: u32) {
        let pool = self.account_pool(account_id);
        let mut shared = pool.idle_shared.lock().unwrap();
        if shared.len() as u32 <= min_idle {
            return;
        }
        let before = shared.len();
        shared.retain(|c| !c.is_stale(max_idle_age));
        let evicted = before - shared.len();
        if evicted > 0 {
            pool.stats
                .evicted_total
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Drains every idle and soon-to-return connection for an account,
    /// for an operator retiring it without restarting the process.
    pub fn drain_account(&self, account_id: &str) {
        self.process_returns();
        let pool = self.account_pool(account_id);
        pool.idle_shared.lock().unwrap().clear();
        pool.idle_isolated.lock().unwrap().clear();
    }
}

/// Holding a lease guarantees exclusive read/write access to the
/// underlying socket for the duration of one request turn. Dropping
/// (rather than calling no method at all) returns the connection to the
/// pool's idle set, capped by `max_idle_per_account` — `Drop` can't be
/// async, so the return goes over an unbounded channel the pool drains on
/// its next `acquire`.
pub struct Lease {
    conn: Option<ConnHandle>,
    key: PoolKey,
    pool: Arc<AccountPool>,
    return_tx: mpsc::UnboundedSender<(String, Returned)>,
    freshly_dialed: bool,
}

impl Lease {
    pub fn conn_id(&self) -> &str {
        &self.conn.as_ref().expect("conn present while leased").id
    }

    /// True when this lease dialed a brand new socket rather than reusing
    /// an idle one — the prewarm priming request only makes sense here.
    pub fn was_freshly_dialed(&self) -> bool {
        self.freshly_dialed
    }
}

impl Deref for Lease {
    type Target = WsStream;
    fn deref(&self) -> &WsStream {
        &self.conn.as_ref().expect("conn present while leased").stream
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut WsStream {
        &mut self.conn.as_mut().expect("conn present while leased").stream
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.stats.leased.fetch_sub(1, Ordering::Relaxed);
        if let Some(mut conn) = self.conn.take() {
            conn.last_used = Instant::now();
            let idle_len = self.pool.idle_shared.lock().unwrap().len() as u32;
            let returned = if self.key.isolated {
                Returned::Isolated(conn)
            } else if idle_len >= self.pool.max_idle {
                Returned::Drop
            } else {
                Returned::Shared(conn)
            };
            let _ = self.return_tx.send((self.key.account_id.clone(), returned));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> Arc<GatewayConfig> {
        Arc::new(GatewayConfig::default())
    }

    #[test]
    fn pool_key_distinguishes_isolated_scopes() {
        let k1 = PoolKey {
            account_id: "a1".into(),
            session_scope: "s1".into(),
            isolated: true,
        };
        let k2 = PoolKey {
            account_id: "a1".into(),
            session_scope: "s2".into(),
            isolated: true,
        };
        assert_ne!(k1, k2);
    }

    #[test]
    fn pool_construction_has_no_accounts_initially() {
        let pool = Pool::new(test_cfg());
        assert!(pool.accounts.lock().unwrap().is_empty());
    }

    #[test]
    fn account_pool_is_created_lazily_per_account() {
        let pool = Pool::new(test_cfg());
        let p1 = pool.account_pool("acct-1");
        let p2 = pool.account_pool("acct-1");
        assert!(Arc::ptr_eq(&p1, &p2));
        assert_eq!(pool.accounts.lock().unwrap().len(), 1);
    }
}

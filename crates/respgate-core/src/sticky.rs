use std::time::{Duration, Instant};

use crate::shard::ShardedMap;

const LEGACY_TTL_CAP: Duration = Duration::from_secs(600);

#[derive(Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A single TTL-keyed binding store, sharded by key hash. Expired entries
/// are never returned; a lazy read-time check is enough since writes are
/// infrequent relative to reads on these hot paths.
struct TtlStore<K, V> {
    shards: ShardedMap<K, Entry<V>>,
}

impl<K, V> TtlStore<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    fn new(shard_count: usize) -> Self {
        Self {
            shards: ShardedMap::new(shard_count),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        let entry = self.shards.get(key)?;
        if entry.expires_at <= Instant::now() {
            self.shards.remove(key);
            return None;
        }
        Some(entry.value)
    }

    fn set(&self, key: K, value: V, ttl: Duration) {
        self.shards.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn delete(&self, key: &K) {
        self.shards.remove(key);
    }

    /// Extends an *existing* binding's TTL; a miss is a no-op.
    fn refresh_ttl(&self, key: &K, ttl: Duration) -> bool {
        self.shards.with_entry_mut(key, |entry| match entry {
            Some(e) if e.expires_at > Instant::now() => {
                e.expires_at = Instant::now() + ttl;
                true
            }
            _ => false,
        })
    }
}

/// C2: every sticky/TTL binding the scheduler and forwarder share.
/// `group` scopes keys to an api-key's tenant so unrelated tenants never
/// collide on the same session_hash or response_id.
pub struct StickyStore {
    response_account: TtlStore<(String, String), String>,
    response_conn: TtlStore<String, String>,
    session_account: TtlStore<(String, String), String>,
    session_turn_state: TtlStore<(String, String), String>,
    account_last_response: TtlStore<String, String>,
    legacy_session_account: TtlStore<(String, String), String>,
    read_old_fallback: bool,
    dual_write_old: bool,
}

impl StickyStore {
    pub fn new(shard_count: usize, read_old_fallback: bool, dual_write_old: bool) -> Self {
        Self {
            response_account: TtlStore::new(shard_count),
            response_conn: TtlStore::new(shard_count),
            session_account: TtlStore::new(shard_count),
            session_turn_state: TtlStore::new(shard_count),
            account_last_response: TtlStore::new(shard_count),
            legacy_session_account: TtlStore::new(shard_count),
            read_old_fallback,
            dual_write_old,
        }
    }

    pub fn bind_response_account(
        &self,
        group: &str,
        response_id: &str,
        account_id: &str,
        ttl: Duration,
    ) {
        self.response_account.set(
            (group.to_string(), response_id.to_string()),
            account_id.to_string(),
            ttl,
        );
    }

    pub fn get_response_account(&self, group: &str, response_id: &str) -> Option<String> {
        self.response_account
            .get(&(group.to_string(), response_id.to_string()))
    }

    pub fn bind_response_conn(&self, response_id: &str, conn_id: &str, ttl: Duration) {
        self.response_conn
            .set(response_id.to_string(), conn_id.to_string(), ttl);
    }

    pub fn get_response_conn(&self, response_id: &str) -> Option<String> {
        self.response_conn.get(&response_id.to_string())
    }

    /// `session_hash` here is already the *current* (64-bit) hash; the
    /// caller passes the legacy (256-bit) hash separately only when
    /// compatibility is needed.
    pub fn bind_session_account(
        &self,
        group: &str,
        session_hash: &str,
        legacy_session_hash: Option<&str>,
        account_id: &str,
        ttl: Duration,
    ) {
        let key = (group.to_string(), session_hash.to_string());
        self.session_account.set(key, account_id.to_string(), ttl);
        if self.dual_write_old {
            if let Some(legacy) = legacy_session_hash {
                self.legacy_session_account.set(
                    (group.to_string(), legacy.to_string()),
                    account_id.to_string(),
                    ttl.min(LEGACY_TTL_CAP),
                );
            }
        }
    }

    pub fn get_session_account(
        &self,
        group: &str,
        session_hash: &str,
        legacy_session_hash: Option<&str>,
    ) -> Option<String> {
        if let Some(v) = self
            .session_account
            .get(&(group.to_string(), session_hash.to_string()))
        {
            return Some(v);
        }
        if self.read_old_fallback {
            if let Some(legacy) = legacy_session_hash {
                return self
                    .legacy_session_account
                    .get(&(group.to_string(), legacy.to_string()));
            }
        }
        None
    }

    pub fn delete_session_account(&self, group: &str, session_hash: &str) {
        self.session_account
            .delete(&(group.to_string(), session_hash.to_string()));
    }

    pub fn refresh_session_account_ttl(&self, group: &str, session_hash: &str, ttl: Duration) -> bool {
        self.session_account
            .refresh_ttl(&(group.to_string(), session_hash.to_string()), ttl)
    }

    pub fn get_session_turn_state(&self, group: &str, session_hash: &str) -> Option<String> {
        self.session_turn_state
            .get(&(group.to_string(), session_hash.to_string()))
    }

    pub fn set_session_turn_state(
        &self,
        group: &str,
        session_hash: &str,
        token: &str,
        ttl: Duration,
    ) {
        self.session_turn_state.set(
            (group.to_string(), session_hash.to_string()),
            token.to_string(),
            ttl,
        );
    }

    pub fn get_last_response_id(&self, account_id: &str) -> Option<String> {
        self.account_last_response.get(&account_id.to_string())
    }

    pub fn set_last_response_id(&self, account_id: &str, response_id: &str, ttl: Duration) {
        self.account_last_response
            .set(account_id.to_string(), response_id.to_string(), ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_binding_roundtrips() {
        let store = StickyStore::new(8, false, false);
        store.bind_response_account("g1", "resp_1", "acct_1", Duration::from_secs(60));
        assert_eq!(
            store.get_response_account("g1", "resp_1"),
            Some("acct_1".to_string())
        );
        assert_eq!(store.get_response_account("g1", "resp_2"), None);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let store = StickyStore::new(8, false, false);
        store.bind_response_account("g1", "resp_1", "acct_1", Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.get_response_account("g1", "resp_1"), None);
    }

    #[test]
    fn refresh_ttl_only_extends_existing_binding() {
        let store = StickyStore::new(8, false, false);
        assert!(!store.refresh_session_account_ttl("g1", "s1", Duration::from_secs(60)));
        store.bind_session_account("g1", "s1", None, "acct_1", Duration::from_millis(5));
        assert!(store.refresh_session_account_ttl("g1", "s1", Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(
            store.get_session_account("g1", "s1", None),
            Some("acct_1".to_string())
        );
    }

    #[test]
    fn legacy_hash_dual_write_and_read_fallback() {
        let store = StickyStore::new(8, true, true);
        store.bind_session_account("g1", "new_hash", Some("legacy_hash"), "acct_1", Duration::from_secs(60));
        // current-key hit
        assert_eq!(
            store.get_session_account("g1", "new_hash", Some("legacy_hash")),
            Some("acct_1".to_string())
        );
        // simulate a client that only has the legacy hash available
        assert_eq!(
            store.get_session_account("g1", "unknown_hash", Some("legacy_hash")),
            Some("acct_1".to_string())
        );
    }

    #[test]
    fn legacy_fallback_disabled_misses() {
        let store = StickyStore::new(8, false, true);
        store.bind_session_account("g1", "new_hash", Some("legacy_hash"), "acct_1", Duration::from_secs(60));
        assert_eq!(
            store.get_session_account("g1", "unknown_hash", Some("legacy_hash")),
            None
        );
    }
}

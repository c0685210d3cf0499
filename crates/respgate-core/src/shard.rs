use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// A sharded concurrent map: each shard is a short-lived `Mutex` around a
/// `HashMap`, keeping contention to one bucket instead of the whole
/// store. Shard count is a power of two fixed at construction.
pub struct ShardedMap<K, V> {
    shards: Vec<Mutex<HashMap<K, V>>>,
    mask: u64,
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl<K, V> ShardedMap<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.next_power_of_two().max(1);
        let mut shards = Vec::with_capacity(shard_count);
        shards.resize_with(shard_count, || Mutex::new(HashMap::new()));
        Self {
            shards,
            mask: (shard_count as u64) - 1,
        }
    }

    fn shard_index(&self, key: &K) -> usize {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() & self.mask) as usize
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let idx = self.shard_index(key);
        self.shards[idx].lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let idx = self.shard_index(&key);
        self.shards[idx].lock().unwrap().insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let idx = self.shard_index(key);
        self.shards[idx].lock().unwrap().remove(key)
    }

    pub fn get_or_insert_with(&self, key: K, default: impl FnOnce() -> V) -> V
    where
        V: Clone,
    {
        let idx = self.shard_index(&key);
        let mut shard = self.shards[idx].lock().unwrap();
        if let Some(v) = shard.get(&key) {
            return v.clone();
        }
        let v = default();
        shard.insert(key, v.clone());
        v
    }

    /// Runs `f` against the existing entry (if any) without cloning `V`.
    /// Used for TTL refresh, where only an existing binding may be
    /// extended — a miss must not create one.
    pub fn with_entry_mut<R>(&self, key: &K, f: impl FnOnce(Option<&mut V>) -> R) -> R {
        let idx = self.shard_index(key);
        let mut shard = self.shards[idx].lock().unwrap();
        f(shard.get_mut(key))
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retains entries for which `f` returns true, across every shard.
    pub fn retain(&self, mut f: impl FnMut(&K, &mut V) -> bool) {
        for shard in &self.shards {
            shard.lock().unwrap().retain(|k, v| f(k, v));
        }
    }
}

/// fnv64a over the scheduler's seed components: `session_hash ∥
/// previous_response_id ∥ model ∥ group_id`.
pub fn fnv64a_seed(parts: &[&str]) -> u64 {
    let mut joined = String::new();
    for p in parts {
        joined.push_str(p);
        joined.push('\u{0}');
    }
    fnv1a(joined.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharded_map_roundtrip() {
        let map: ShardedMap<String, u32> = ShardedMap::new(8);
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        assert_eq!(map.get(&"a".to_string()), Some(1));
        assert_eq!(map.get(&"b".to_string()), Some(2));
        assert_eq!(map.get(&"c".to_string()), None);
        assert_eq!(map.len(), 2);
        map.remove(&"a".to_string());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn seed_is_deterministic() {
        let a = fnv64a_seed(&["s1", "resp1", "gpt-5.1", "g1"]);
        let b = fnv64a_seed(&["s1", "resp1", "gpt-5.1", "g1"]);
        assert_eq!(a, b);
        let c = fnv64a_seed(&["s2", "resp1", "gpt-5.1", "g1"]);
        assert_ne!(a, c);
    }
}

//! Bounded window of recently seen message ids, per sender.
//!
//! Ids are scoped to the sender that used them: two senders picking the same
//! id do not collide.
//!
//! Sharded by key hash so concurrent connection handlers rarely share a lock.
//! Each shard evicts its oldest id once full, so the window holds roughly
//! the configured number of ids.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

const SHARDS: usize = 16;

type Key = (String, String);

#[derive(Default)]
struct Shard {
    seen: HashSet<Key>,
    order: VecDeque<Key>,
}

pub struct RecentIds {
    shards: Vec<Mutex<Shard>>,
    per_shard: usize,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(Shard::default())).collect(),
            per_shard: capacity.div_ceil(SHARDS).max(1),
        }
    }

    fn shard(&self, key: &Key) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    /// Record `id` as sent by `sender`. Returns `false` if that sender
    /// already used it within the window.
    pub fn check_and_insert(&self, sender: &str, id: &str) -> bool {
        let key = (sender.to_string(), id.to_string());
        let mut shard = self.shard(&key).lock().unwrap_or_else(|e| e.into_inner());
        if shard.seen.contains(&key) {
            return false;
        }
        if shard.order.len() >= self.per_shard
            && let Some(oldest) = shard.order.pop_front()
        {
            shard.seen.remove(&oldest);
        }
        shard.seen.insert(key.clone());
        shard.order.push_back(key);
        true
    }

    pub fn contains(&self, sender: &str, id: &str) -> bool {
        let key = (sender.to_string(), id.to_string());
        self.shard(&key)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .seen
            .contains(&key)
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).order.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

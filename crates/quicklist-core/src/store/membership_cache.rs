//! Persisted, expiring membership cache and per-list recency.
//!
//! Two logical keys:
//! - `memberships`: subject id -> `{ lists, expires }`. Each entry expires a
//!   fixed duration after it was last written and is evicted lazily when a
//!   read finds it stale.
//! - `list_activity`: list id -> unix ms of the last successful add through
//!   this tool. Never expires.
//!
//! This is a display aid only; writes are decided against the authoritative
//! snapshot, never against this cache. Storage failures are logged and
//! swallowed so a broken disk never blocks list management.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::constants::keys;
use crate::models::{Container, ContainerIdSet};
use crate::store::kv::KvStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MembershipEntry {
    lists: BTreeSet<String>,
    /// Unix ms after which the entry is stale.
    expires: u64,
}

type MembershipMap = HashMap<String, MembershipEntry>;
type ActivityMap = HashMap<String, u64>;

pub struct MembershipCache {
    kv: Arc<dyn KvStore>,
    clock: SharedClock,
    ttl: Duration,
    /// Serializes read-modify-write cycles on the stored maps.
    write_lock: Mutex<()>,
}

impl MembershipCache {
    pub fn new(kv: Arc<dyn KvStore>, clock: SharedClock, ttl: Duration) -> Self {
        Self {
            kv,
            clock,
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let Some(raw) = self.kv.get(key) else {
            return T::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(key, "discarding unreadable cache value: {}", e);
            T::default()
        })
    }

    fn save<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(Into::into)
            .and_then(|json| self.kv.set(key, &json));
        if let Err(e) = result {
            tracing::warn!(key, "cache write failed: {}", e);
        }
    }

    fn expiry_from_now(&self) -> u64 {
        self.clock
            .now_ms()
            .saturating_add(self.ttl.as_millis() as u64)
    }

    /// Cached memberships for `subject_id`, or `None` when absent or stale.
    /// A stale entry is removed from storage by this read.
    pub fn get(&self, subject_id: &str) -> Option<ContainerIdSet> {
        let _guard = self.write_lock.lock();
        let mut map: MembershipMap = self.load(keys::MEMBERSHIPS);
        let entry = map.get(subject_id)?;

        if self.clock.now_ms() > entry.expires {
            tracing::debug!(subject_id, "evicting expired membership entry");
            map.remove(subject_id);
            self.save(keys::MEMBERSHIPS, &map);
            return None;
        }
        Some(entry.lists.clone())
    }

    /// Replace the cached memberships for `subject_id` with a fresh snapshot.
    pub fn put(&self, subject_id: &str, lists: &ContainerIdSet) {
        let _guard = self.write_lock.lock();
        let mut map: MembershipMap = self.load(keys::MEMBERSHIPS);
        map.insert(
            subject_id.to_string(),
            MembershipEntry {
                lists: lists.clone(),
                expires: self.expiry_from_now(),
            },
        );
        self.save(keys::MEMBERSHIPS, &map);
    }

    /// Record a confirmed add and mark the list as recently used.
    pub fn record_add(&self, container_id: &str, subject_id: &str) {
        let _guard = self.write_lock.lock();
        let now = self.clock.now_ms();
        let expires = self.expiry_from_now();

        let mut map: MembershipMap = self.load(keys::MEMBERSHIPS);
        let entry = map
            .entry(subject_id.to_string())
            .or_insert_with(|| MembershipEntry {
                lists: BTreeSet::new(),
                expires,
            });
        if now > entry.expires {
            entry.lists.clear();
        }
        entry.lists.insert(container_id.to_string());
        entry.expires = expires;
        self.save(keys::MEMBERSHIPS, &map);

        let mut activity: ActivityMap = self.load(keys::LIST_ACTIVITY);
        activity.insert(container_id.to_string(), now);
        self.save(keys::LIST_ACTIVITY, &activity);
    }

    /// Record a confirmed removal.
    pub fn record_remove(&self, container_id: &str, subject_id: &str) {
        let _guard = self.write_lock.lock();
        let mut map: MembershipMap = self.load(keys::MEMBERSHIPS);
        let Some(entry) = map.get_mut(subject_id) else {
            return;
        };
        if self.clock.now_ms() > entry.expires {
            map.remove(subject_id);
        } else {
            entry.lists.remove(container_id);
            entry.expires = self.expiry_from_now();
        }
        self.save(keys::MEMBERSHIPS, &map);
    }

    /// Drop every trace of a deleted list.
    pub fn forget_container(&self, container_id: &str) {
        let _guard = self.write_lock.lock();
        let mut map: MembershipMap = self.load(keys::MEMBERSHIPS);
        for entry in map.values_mut() {
            entry.lists.remove(container_id);
        }
        self.save(keys::MEMBERSHIPS, &map);

        let mut activity: ActivityMap = self.load(keys::LIST_ACTIVITY);
        if activity.remove(container_id).is_some() {
            self.save(keys::LIST_ACTIVITY, &activity);
        }
    }

    /// Last-touched timestamps (unix ms) by list id.
    pub fn activity(&self) -> HashMap<String, u64> {
        self.load(keys::LIST_ACTIVITY)
    }

    /// Most recently used lists first; untouched lists keep their fetch order
    /// after all touched ones.
    pub fn sort_by_recency(&self, containers: &mut [Container]) {
        let activity = self.activity();
        containers.sort_by_key(|c| std::cmp::Reverse(activity.get(&c.id).copied().unwrap_or(0)));
    }

    /// Subjects with a live (unexpired) cached entry.
    pub fn cached_subject_count(&self) -> usize {
        let now = self.clock.now_ms();
        let map: MembershipMap = self.load(keys::MEMBERSHIPS);
        map.values().filter(|e| now <= e.expires).count()
    }

    /// Remove both keys. Lists on the remote are untouched.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        for key in [keys::MEMBERSHIPS, keys::LIST_ACTIVITY] {
            if let Err(e) = self.kv.remove(key) {
                tracing::warn!(key, "failed to clear cache key: {}", e);
            }
        }
        tracing::info!("membership cache cleared");
    }
}

// Copyright 2025 pincache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::{
    fmt::Debug,
    hash::BuildHasher,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use ahash::RandomState;
use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use pincache_common::{
    code::{Key, Value},
    event::{Event, EventListener},
    strict_assert,
};

use crate::eviction::{Eviction, EvictionConfig};

/// Computes the weight of an entry. Called on every insertion and recomputation of the entry.
pub trait Weighter<K, V>: Fn(&K, &V) -> u64 + Send + Sync + 'static {}
impl<K, V, T> Weighter<K, V> for T where T: Fn(&K, &V) -> u64 + Send + Sync + 'static {}

/// The decision of a [`WeightedCache::compute`] callback.
#[derive(Debug)]
pub enum Compute<V> {
    /// Keep the current slot (or keep the slot absent), re-weighing it if present.
    Retain,
    /// Put a new value into the slot, replacing the current one.
    Insert(V),
    /// Remove the current slot.
    Remove,
}

/// Config for [`WeightedCache`].
pub struct WeightedCacheConfig<K, V>
where
    K: Key,
    V: Value,
{
    /// Total weight capacity.
    pub capacity: u64,
    /// Count of the lock-striped shards.
    pub shards: usize,
    /// Eviction algorithm for each shard.
    pub eviction_config: EvictionConfig,
    /// Weighter for the entries.
    pub weighter: Arc<dyn Weighter<K, V>>,
    /// Listener notified, out of the shard locks, for every entry that leaves.
    pub event_listener: Option<Arc<dyn EventListener<Key = K, Value = V>>>,
}

struct Node<V> {
    value: V,
    weight: u64,
}

type Garbages<K, V> = Vec<(Event, K, V)>;

struct WeightedCacheShard<K, V>
where
    K: Key,
    V: Value,
{
    map: HashMap<K, Node<V>>,
    eviction: Box<dyn Eviction<K>>,

    /// Usage of the whole cache, shared by all shards.
    usage: Arc<AtomicU64>,
}

impl<K, V> WeightedCacheShard<K, V>
where
    K: Key,
    V: Value,
{
    fn increase(&self, weight: u64) {
        self.usage.fetch_add(weight, Ordering::AcqRel);
    }

    fn decrease(&self, weight: u64) {
        let prev = self.usage.fetch_sub(weight, Ordering::AcqRel);
        strict_assert!(prev >= weight);
    }

    /// Pop the next victim of the shard, if any.
    fn evict(&mut self) -> Option<(Event, K, V)> {
        loop {
            let key = self.eviction.pop()?;
            let node = self.map.remove(&key);
            strict_assert!(node.is_some(), "evicted key {key:?} is not in the shard");
            let Some(node) = node else { continue };
            strict_assert!(node.weight > 0);
            self.decrease(node.weight);
            return Some((Event::Evict, key, node.value));
        }
    }

    fn unlink(&mut self, key: &K, weight: u64) {
        if weight > 0 {
            let removed = self.eviction.remove(key);
            strict_assert!(removed);
        }
        self.decrease(weight);
    }

    fn link(&mut self, key: &K, weight: u64) {
        if weight > 0 {
            self.eviction.push(key.clone());
        }
        self.increase(weight);
    }

    fn insert(&mut self, key: K, value: V, weight: u64, garbages: &mut Garbages<K, V>) {
        if let Some((key, old)) = self.remove(&key) {
            garbages.push((Event::Replace, key, old));
        }
        self.link(&key, weight);
        self.map.insert(key, Node { value, weight });
    }

    fn remove(&mut self, key: &K) -> Option<(K, V)> {
        let (key, node) = self.map.remove_entry(key)?;
        self.unlink(&key, node.weight);
        Some((key, node.value))
    }

    fn reweigh(&mut self, key: &K, weight: u64) {
        let Some(node) = self.map.get_mut(key) else {
            return;
        };
        let old = std::mem::replace(&mut node.weight, weight);
        match (old > 0, weight > 0) {
            (true, true) => self.eviction.access(key),
            (true, false) => {
                let removed = self.eviction.remove(key);
                strict_assert!(removed);
            }
            (false, true) => self.eviction.push(key.clone()),
            (false, false) => {}
        }
        // Increase first, the shared usage never goes below zero.
        self.increase(weight);
        self.decrease(old);
    }

    fn clear(&mut self, garbages: &mut Garbages<K, V>) {
        self.eviction.clear();
        for (key, node) in self.map.drain() {
            self.usage.fetch_sub(node.weight, Ordering::AcqRel);
            garbages.push((Event::Clear, key, node.value));
        }
    }
}

/// A lock-striped map bounded by the total weight of its entries.
///
/// Mutations of one key are serialized by its shard lock. The weight bound is global: the usage of all shards is
/// summed up and compared with one capacity, and overflow is reclaimed from the shards in turns, one victim at a time,
/// so an entry is never evicted only because its shard is crowded. Only entries with a positive weight are candidates
/// for eviction.
///
/// [`WeightedCache::insert`] and [`WeightedCache::resize`] evict overflow right away. [`WeightedCache::compute`] only
/// re-weighs, the overflow it may cause is reclaimed by the next [`WeightedCache::resize`] or
/// [`WeightedCache::maintain`].
pub struct WeightedCache<K, V>
where
    K: Key,
    V: Value,
{
    shards: Vec<Mutex<WeightedCacheShard<K, V>>>,
    usage: Arc<AtomicU64>,
    capacity: AtomicU64,
    /// The shard to reclaim from first in the next eviction pass.
    cursor: AtomicUsize,

    hash_builder: RandomState,
    weighter: Arc<dyn Weighter<K, V>>,
    event_listener: Option<Arc<dyn EventListener<Key = K, Value = V>>>,
}

impl<K, V> Debug for WeightedCache<K, V>
where
    K: Key,
    V: Value,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedCache")
            .field("shards", &self.shards.len())
            .field("capacity", &self.capacity())
            .field("usage", &self.usage())
            .finish()
    }
}

impl<K, V> WeightedCache<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a weighted cache with the given config.
    ///
    /// # Panics
    ///
    /// Panics if `config.shards` is zero.
    pub fn new(config: WeightedCacheConfig<K, V>) -> Self {
        assert!(config.shards > 0, "shards must be greater than zero");

        let usage = Arc::new(AtomicU64::new(0));
        let shards = (0..config.shards)
            .map(|_| WeightedCacheShard {
                map: HashMap::new(),
                eviction: config.eviction_config.build(),
                usage: usage.clone(),
            })
            .map(Mutex::new)
            .collect_vec();

        Self {
            shards,
            usage,
            capacity: AtomicU64::new(config.capacity),
            cursor: AtomicUsize::new(0),
            hash_builder: RandomState::new(),
            weighter: config.weighter,
            event_listener: config.event_listener,
        }
    }

    /// Insert an entry, then evict candidates if the cache overflows.
    ///
    /// The replaced entry (if any) is reported as [`Event::Replace`].
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "pincache::policy::weighted::insert"))]
    pub fn insert(&self, key: K, value: V) {
        let weight = (self.weighter)(&key, &value);
        let mut garbages = vec![];
        self.shard(&key).lock().insert(key, value, weight, &mut garbages);
        self.evict(&mut garbages);
        self.notify(garbages);
    }

    /// Atomically inspect and update the slot of `key`.
    ///
    /// `f` runs under the shard lock with the current value, if any. Whatever the decision is, the entry left in the
    /// slot is re-weighed with the weighter. No entry is evicted here.
    ///
    /// The replaced or removed entry is reported as [`Event::Replace`] or [`Event::Remove`] after the lock is released.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "pincache::policy::weighted::compute"))]
    pub fn compute<F, R>(&self, key: K, f: F) -> R
    where
        F: FnOnce(&K, Option<&V>) -> (Compute<V>, R),
    {
        let mut garbages = vec![];

        let res = {
            let mut shard = self.shard(&key).lock();
            let (compute, res) = f(&key, shard.map.get(&key).map(|node| &node.value));
            match compute {
                Compute::Retain => {
                    let weight = shard.map.get(&key).map(|node| (self.weighter)(&key, &node.value));
                    if let Some(weight) = weight {
                        shard.reweigh(&key, weight);
                    }
                }
                Compute::Insert(value) => {
                    let weight = (self.weighter)(&key, &value);
                    shard.insert(key, value, weight, &mut garbages);
                }
                Compute::Remove => {
                    if let Some((key, old)) = shard.remove(&key) {
                        garbages.push((Event::Remove, key, old));
                    }
                }
            }
            res
        };

        self.notify(garbages);
        res
    }

    /// Get the value of `key` and record the access for the eviction algorithm.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut shard = self.shard(key).lock();
        let node = shard.map.get(key)?;
        let (value, weight) = (node.value.clone(), node.weight);
        if weight > 0 {
            shard.eviction.access(key);
        }
        Some(value)
    }

    /// Get the value of `key` without recording the access.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.shard(key).lock().map.get(key).map(|node| node.value.clone())
    }

    /// Return `true` if `key` is in the cache.
    pub fn contains(&self, key: &K) -> bool {
        self.shard(key).lock().map.contains_key(key)
    }

    /// Remove `key` and return its value. The entry is also reported as [`Event::Remove`].
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "pincache::policy::weighted::remove"))]
    pub fn remove(&self, key: &K) -> Option<V> {
        let (key, value) = self.shard(key).lock().remove(key)?;
        if let Some(listener) = self.event_listener.as_ref() {
            listener.on_leave(Event::Remove, &key, &value);
        }
        Some(value)
    }

    /// Remove all entries, reporting them as [`Event::Clear`].
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "pincache::policy::weighted::clear"))]
    pub fn clear(&self) {
        let mut garbages = vec![];
        for shard in self.shards.iter() {
            shard.lock().clear(&mut garbages);
        }
        self.notify(garbages);
    }

    /// Change the capacity and evict the overflow.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "pincache::policy::weighted::resize"))]
    pub fn resize(&self, capacity: u64) {
        self.capacity.store(capacity, Ordering::Release);
        let mut garbages = vec![];
        self.evict(&mut garbages);
        if !garbages.is_empty() {
            tracing::debug!(
                "[weighted cache]: resize to {} evicted {} entries",
                capacity,
                garbages.len()
            );
        }
        self.notify(garbages);
    }

    /// Evict the overflow with the current capacity.
    pub fn maintain(&self) {
        let mut garbages = vec![];
        self.evict(&mut garbages);
        self.notify(garbages);
    }

    /// Total weight of the entries.
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    /// Current capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Acquire)
    }

    /// Count of the entries, including the ones weighing zero.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().map.len()).sum()
    }

    /// Return `true` if there is no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of the shards.
    pub fn shards(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &K) -> &Mutex<WeightedCacheShard<K, V>> {
        let hash = self.hash_builder.hash_one(key);
        &self.shards[hash as usize % self.shards.len()]
    }

    /// Reclaim victims from the shards in turns until the usage fits in the capacity, or a whole turn finds no victim.
    ///
    /// Takes one shard lock at a time.
    fn evict(&self, garbages: &mut Garbages<K, V>) {
        let shards = self.shards.len();
        let mut index = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut idle = 0;
        while idle < shards && self.usage() > self.capacity() {
            match self.shards[index % shards].lock().evict() {
                Some(garbage) => {
                    garbages.push(garbage);
                    idle = 0;
                }
                None => idle += 1,
            }
            index = index.wrapping_add(1);
        }
    }

    // Notify out of the lock critical section.
    fn notify(&self, garbages: Garbages<K, V>) {
        if let Some(listener) = self.event_listener.as_ref() {
            for (event, key, value) in garbages.iter() {
                listener.on_leave(*event, key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, RngCore, SeedableRng};

    use super::*;
    use crate::eviction::fifo::FifoConfig;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<(Event, u64, u64)>>,
    }

    impl EventListener for Recorder {
        type Key = u64;
        type Value = u64;

        fn on_leave(&self, reason: Event, key: &u64, value: &u64) {
            self.events.lock().push((reason, *key, *value));
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<(Event, u64, u64)> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    /// The value is the weight.
    fn cache(capacity: u64, shards: usize, eviction_config: EvictionConfig) -> (WeightedCache<u64, u64>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let cache = WeightedCache::new(WeightedCacheConfig {
            capacity,
            shards,
            eviction_config,
            weighter: Arc::new(|_, v| *v),
            event_listener: Some(recorder.clone()),
        });
        (cache, recorder)
    }

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<WeightedCache<u64, u64>>();
    }

    #[test_log::test]
    fn test_weight_bound_is_global() {
        let (cache, recorder) = cache(100, 8, EvictionConfig::default());

        // Heavier than an even share of the capacity.
        cache.insert(1, 90);
        assert!(cache.contains(&1));
        assert_eq!(cache.usage(), 90);

        (2..12).for_each(|i| cache.insert(i, 10));
        assert!(cache.usage() <= 100);
        assert!(!recorder.take().is_empty());

        let usage = cache.usage();
        cache.resize(1000);
        (12..100).for_each(|i| cache.insert(i, 10));
        assert_eq!(cache.usage(), usage + 880);
        assert!(recorder.take().is_empty());
    }

    #[test_log::test]
    fn test_insert_evicts_lru() {
        let (cache, recorder) = cache(100, 1, EvictionConfig::default());
        cache.insert(1, 40);
        cache.insert(2, 40);
        assert_eq!(cache.get(&1), Some(40));
        cache.insert(3, 40);

        assert_eq!(recorder.take(), vec![(Event::Evict, 2, 40)]);
        assert_eq!(cache.usage(), 80);
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test_log::test]
    fn test_insert_evicts_fifo() {
        let (cache, recorder) = cache(100, 1, FifoConfig.into());
        cache.insert(1, 40);
        cache.insert(2, 40);
        assert_eq!(cache.get(&1), Some(40));
        cache.insert(3, 40);

        assert_eq!(recorder.take(), vec![(Event::Evict, 1, 40)]);
    }

    #[test_log::test]
    fn test_peek_does_not_touch() {
        let (cache, recorder) = cache(100, 1, EvictionConfig::default());
        cache.insert(1, 40);
        cache.insert(2, 40);
        assert_eq!(cache.peek(&1), Some(40));
        cache.insert(3, 40);

        assert_eq!(recorder.take(), vec![(Event::Evict, 1, 40)]);
    }

    #[test_log::test]
    fn test_zero_weight_never_evicted() {
        let (cache, recorder) = cache(100, 1, EvictionConfig::default());
        cache.insert(1, 0);
        cache.insert(2, 60);
        cache.resize(0);

        assert_eq!(recorder.take(), vec![(Event::Evict, 2, 60)]);
        assert!(cache.contains(&1));
        assert_eq!(cache.usage(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test_log::test]
    fn test_compute_reweighs_without_eviction() {
        let recorder = Arc::new(Recorder::default());
        let pinned = Arc::new(Mutex::new(hashbrown::HashSet::new()));
        let weighter = {
            let pinned = pinned.clone();
            move |k: &u64, v: &u64| if pinned.lock().contains(k) { 0 } else { *v }
        };
        let cache = WeightedCache::new(WeightedCacheConfig {
            capacity: 100,
            shards: 1,
            eviction_config: EvictionConfig::default(),
            weighter: Arc::new(weighter),
            event_listener: Some(recorder.clone()),
        });

        pinned.lock().insert(1);
        let inserted = cache.compute(1, |_, current| {
            assert!(current.is_none());
            (Compute::Insert(80), true)
        });
        assert!(inserted);
        assert_eq!(cache.usage(), 0);

        cache.insert(2, 60);
        assert_eq!(cache.usage(), 60);

        // Unpin: the weight of key 1 rises in place and overflows, nothing is evicted until maintenance.
        pinned.lock().remove(&1);
        let seen = cache.compute(1, |_, current| (Compute::Retain, current.copied()));
        assert_eq!(seen, Some(80));
        assert_eq!(cache.usage(), 140);
        assert!(recorder.take().is_empty());

        cache.maintain();
        assert_eq!(recorder.take(), vec![(Event::Evict, 2, 60)]);
        assert_eq!(cache.usage(), 80);
    }

    #[test_log::test]
    fn test_compute_replace_and_remove() {
        let (cache, recorder) = cache(100, 1, EvictionConfig::default());
        cache.insert(1, 10);
        cache.compute(1, |_, _| (Compute::Insert(20), ()));
        assert_eq!(cache.usage(), 20);
        cache.compute(1, |_, _| (Compute::Remove, ()));
        cache.compute(2, |_, _| (Compute::Remove, ()));
        assert_eq!(recorder.take(), vec![(Event::Replace, 1, 10), (Event::Remove, 1, 20)]);
        assert_eq!(cache.usage(), 0);
        assert!(cache.is_empty());
    }

    #[test_log::test]
    fn test_remove_and_clear() {
        let (cache, recorder) = cache(100, 4, EvictionConfig::default());
        (0..8).for_each(|i| cache.insert(i, 1));

        assert_eq!(cache.remove(&3), Some(1));
        assert_eq!(cache.remove(&3), None);
        assert_eq!(recorder.take(), vec![(Event::Remove, 3, 1)]);

        cache.clear();
        let events = recorder.take();
        assert_eq!(events.len(), 7);
        assert!(events.iter().all(|(event, _, _)| *event == Event::Clear));
        assert_eq!(cache.usage(), 0);
        assert!(cache.is_empty());
    }

    #[test_log::test]
    fn test_resize() {
        let (cache, recorder) = cache(100, 1, EvictionConfig::default());
        (0..10).for_each(|i| cache.insert(i, 10));

        cache.resize(45);
        assert_eq!(cache.capacity(), 45);
        assert_eq!(cache.usage(), 40);
        assert_eq!(
            recorder.take().into_iter().map(|(_, k, _)| k).collect_vec(),
            (0..6).collect_vec()
        );

        cache.resize(100);
        cache.insert(10, 60);
        assert_eq!(cache.usage(), 100);
        assert!(recorder.take().is_empty());
    }

    #[test_log::test]
    fn test_fuzzy_usage_within_capacity() {
        let (cache, _) = cache(1024, 4, EvictionConfig::default());
        let mut rng = SmallRng::seed_from_u64(114514);
        for _ in 0..10000 {
            let key = rng.next_u64() % 512;
            let weight = rng.next_u64() % 32;
            match rng.next_u64() % 4 {
                0 => {
                    cache.remove(&key);
                }
                1 => cache.compute(key, |_, _| (Compute::Insert(weight), ())),
                _ => cache.insert(key, weight),
            }
            cache.maintain();
            assert!(cache.usage() <= cache.capacity());
        }
    }
}

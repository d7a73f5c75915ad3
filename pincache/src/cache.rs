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
    borrow::Cow,
    fmt::Debug,
    future::Future,
    marker::PhantomData,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use pincache_common::{
    code::Key,
    error::{Error, ErrorKind, Result},
    metrics::{registry::noop::NoopMetricsRegistry, BoxedRegistry, RegistryOps},
    quiescence::Quiescence,
    spawn::{SpawnHandle, Spawner},
    strict_assert,
};
use pincache_policy::{eviction::EvictionConfig, Compute, WeightedCache, WeightedCacheConfig};

use crate::{
    entry::Entry,
    listener::EvictionHook,
    metrics::Metrics,
    stats::{Stats, StatsCache},
};

pub(crate) type Population<E> = Shared<BoxFuture<'static, Result<Arc<E>>>>;

/// A cache slot: the shared population of an entry, in flight or resolved, and the count of the `get`s whose pin has
/// not landed yet.
///
/// A slot with pending pins weighs nothing, so it cannot be chosen as a victim between a `get` and its pin.
pub(crate) struct Slot<E> {
    population: Population<E>,
    pending: Arc<AtomicUsize>,
}

impl<E> Clone for Slot<E> {
    fn clone(&self) -> Self {
        Self {
            population: self.population.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<E> Slot<E>
where
    E: Send + Sync + 'static,
{
    fn populate<FU, ER>(future: FU) -> Self
    where
        FU: Future<Output = std::result::Result<E, ER>> + Send + 'static,
        ER: Into<anyhow::Error> + Send + 'static,
    {
        let population = async move { future.await.map(Arc::new).map_err(Error::loader) }
            .boxed()
            .shared();
        Self {
            population,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn population(&self) -> Population<E> {
        self.population.clone()
    }

    pub(crate) fn peek(&self) -> Option<&Result<Arc<E>>> {
        self.population.peek()
    }

    pub(crate) fn resolved(&self) -> Option<&Arc<E>> {
        self.peek()?.as_ref().ok()
    }

    /// Return `true` if both are the same slot.
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pending, &other.pending)
    }

    fn pending_pins(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn begin_pin(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn end_pin(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::AcqRel);
        strict_assert!(prev > 0);
    }
}

/// Builder for [`PinningCache`].
pub struct PinningCacheBuilder<K, E> {
    name: Cow<'static, str>,
    max_size_bytes: u64,
    shards: usize,
    eviction_config: EvictionConfig,
    spawner: Option<Spawner>,
    registry: BoxedRegistry,
    stats_ttl: Duration,
    quiescence_timeout: Duration,
    _marker: PhantomData<fn(K, E)>,
}

impl<K, E> PinningCacheBuilder<K, E>
where
    K: Key,
    E: Entry<K>,
{
    /// Create a builder for a pinning cache that holds at most `max_size_bytes` bytes, pinned or not.
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            name: "pincache".into(),
            max_size_bytes,
            shards: 8,
            eviction_config: EvictionConfig::default(),
            spawner: None,
            registry: Box::new(NoopMetricsRegistry),
            stats_ttl: Duration::from_secs(2),
            quiescence_timeout: Duration::from_millis(100),
            _marker: PhantomData,
        }
    }

    /// Set the name of the cache, used as the `name` label of the metrics.
    ///
    /// Default: `pincache`.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the count of the lock-striped shards. The byte budget is shared by all shards.
    ///
    /// Default: `8`.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the eviction algorithm that ranks the unpinned entries.
    ///
    /// Default: lru.
    pub fn with_eviction_config(mut self, eviction_config: impl Into<EvictionConfig>) -> Self {
        self.eviction_config = eviction_config.into();
        self
    }

    /// Set the spawner for the pin, unpin and eviction hook tasks.
    ///
    /// Default: the runtime `build` is called in.
    pub fn with_spawner(mut self, spawner: impl Into<Spawner>) -> Self {
        self.spawner = Some(spawner.into());
        self
    }

    /// Set the metrics registry.
    ///
    /// Default: [`NoopMetricsRegistry`].
    pub fn with_metrics_registry(mut self, registry: impl RegistryOps) -> Self {
        self.registry = Box::new(registry);
        self
    }

    /// Set how long a [`Stats`] snapshot is reused.
    ///
    /// Default: 2s.
    pub fn with_stats_ttl(mut self, ttl: Duration) -> Self {
        self.stats_ttl = ttl;
        self
    }

    /// Set the bound of the wait for background tasks in [`PinningCache::invalidate`] and [`PinningCache::close`].
    ///
    /// Default: 100ms.
    pub fn with_quiescence_timeout(mut self, timeout: Duration) -> Self {
        self.quiescence_timeout = timeout;
        self
    }

    /// Build the pinning cache.
    ///
    /// Fails with [`ErrorKind::Config`] if the shard count is zero, or if no spawner is given and `build` is not
    /// called in a tokio runtime.
    pub fn build(self) -> Result<PinningCache<K, E>> {
        if self.shards == 0 {
            return Err(Error::new(ErrorKind::Config, "shards must be greater than zero")
                .with_context("name", &self.name));
        }
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => tokio::runtime::Handle::try_current().map(Spawner::from).map_err(|e| {
                Error::new(ErrorKind::Config, "no spawner given and not in a tokio runtime").with_source(e)
            })?,
        };

        let metrics = Arc::new(Metrics::new(self.name.clone(), self.registry.as_ref()));
        let quiescence = Quiescence::default();

        let hook = EvictionHook::new(spawner.clone(), quiescence.clone(), metrics.clone());
        let policy = WeightedCache::new(WeightedCacheConfig {
            capacity: self.max_size_bytes,
            shards: self.shards,
            eviction_config: self.eviction_config,
            weighter: Arc::new(|_: &K, slot: &Slot<E>| match slot.resolved() {
                Some(entry) if entry.refs().count() == 0 && slot.pending_pins() == 0 => entry.weight(),
                _ => 0,
            }),
            event_listener: Some(Arc::new(hook)),
        });

        tracing::debug!(
            "[pinning cache]: {} created with {} bytes over {} shards",
            self.name,
            self.max_size_bytes,
            self.shards
        );

        let inner = PinningCacheInner {
            name: self.name,
            max_size_bytes: self.max_size_bytes,
            policy,
            pinned_bytes: Mutex::new(0),
            spawner,
            quiescence,
            quiescence_timeout: self.quiescence_timeout,
            stats: StatsCache::new(self.stats_ttl),
            metrics,
            closed: AtomicBool::new(false),
        };
        Ok(PinningCache { inner: Arc::new(inner) })
    }
}

struct PinningCacheInner<K, E>
where
    K: Key,
    E: Entry<K>,
{
    name: Cow<'static, str>,
    max_size_bytes: u64,

    policy: WeightedCache<K, Slot<E>>,
    /// Signed, a removal may return the bytes of a pin whose accounting has not landed yet.
    pinned_bytes: Mutex<i64>,

    spawner: Spawner,
    quiescence: Quiescence,
    quiescence_timeout: Duration,

    stats: StatsCache,
    metrics: Arc<Metrics>,

    closed: AtomicBool,
}

impl<K, E> PinningCacheInner<K, E>
where
    K: Key,
    E: Entry<K>,
{
    /// Move `delta` bytes into (or out of) the pinned pool and fit the eviction policy into the rest of the budget.
    ///
    /// Must not be called with a shard lock held.
    fn update_pinned_bytes(&self, delta: i64) {
        {
            let mut pinned = self.pinned_bytes.lock();
            *pinned += delta;
            let capacity = self.max_size_bytes.saturating_sub((*pinned).max(0) as u64);
            self.policy.resize(capacity);
            tracing::debug!(
                "[pinning cache]: {} pinned bytes {:+} => {}, evictable capacity => {}",
                self.name,
                delta,
                *pinned,
                capacity
            );
        }
        // Refresh the gauges if the snapshot has expired.
        self.stats();
    }

    fn pinned(&self) -> u64 {
        (*self.pinned_bytes.lock()).max(0) as u64
    }

    fn stats(&self) -> Stats {
        self.stats.get_or_refresh(|| {
            let pinned_bytes = self.pinned();
            let evictable_bytes = self.policy.usage();
            let stats = Stats {
                pinned_bytes,
                evictable_bytes,
                free_bytes: self.max_size_bytes.saturating_sub(pinned_bytes + evictable_bytes),
            };
            self.metrics.record(&stats);
            stats
        })
    }

    /// Pin the entry of `slot` once it resolves. The caller has already called [`Slot::begin_pin`].
    async fn pin(self: Arc<Self>, key: K, slot: Slot<E>) -> Result<Arc<E>> {
        let entry = match slot.population().await {
            Ok(entry) => entry,
            Err(e) => {
                slot.end_pin();
                // Failures are not cached, the next `get` loads again.
                let removed = self.policy.compute(key, |_, current| match current {
                    Some(current) if current.ptr_eq(&slot) => (Compute::Remove, true),
                    _ => (Compute::Retain, false),
                });
                if removed {
                    self.metrics.load_error.increase(1);
                    tracing::debug!("[pinning cache]: {} load failed: {}", self.name, e);
                }
                return Err(e);
            }
        };

        // The pending pin turns into a reference in one step, the slot never weighs in between.
        let acquired = self.policy.compute(key.clone(), |_, current| {
            let acquired = match current {
                Some(current) if current.ptr_eq(&slot) => Some(entry.refs().acquire()),
                _ => None,
            };
            slot.end_pin();
            (Compute::Retain, acquired)
        });

        match acquired {
            Some(refs) => {
                tracing::trace!("[pinning cache]: pin {:?}, refs {} => {}", key, refs, refs + 1);
                if refs == 0 {
                    self.update_pinned_bytes(entry.weight() as i64);
                }
                self.metrics.pin.increase(1);
                Ok(entry)
            }
            None => Err(Error::invalidated(&key)),
        }
    }

    fn unpin(&self, key: K) {
        let released = self.policy.compute(key.clone(), |_, current| {
            match current.and_then(Slot::resolved) {
                Some(entry) => {
                    let refs = entry.refs().release();
                    (Compute::Retain, Some((entry.weight(), refs)))
                }
                None => (Compute::Retain, None),
            }
        });

        match released {
            Some((weight, refs)) => {
                tracing::trace!("[pinning cache]: unpin {:?}, refs {} => {}", key, refs + 1, refs);
                if refs == 0 {
                    self.update_pinned_bytes(-(weight as i64));
                }
                self.metrics.unpin.increase(1);
            }
            None => tracing::warn!("[pinning cache]: release {:?} which is not resident", key),
        }
    }

    async fn quiesce(&self) {
        self.policy.maintain();
        self.quiescence.wait(self.quiescence_timeout).await;
    }
}

/// Future of [`PinningCache::get`].
///
/// Dropping it does not cancel the population nor the pin. A pin whose future is dropped still has to be released.
#[must_use]
pub struct GetFuture<E> {
    inner: Option<SpawnHandle<Result<Arc<E>>>>,
}

impl<E> Debug for GetFuture<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetFuture").field("closed", &self.inner.is_none()).finish()
    }
}

impl<E> Future for GetFuture<E> {
    type Output = Result<Arc<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.inner.as_mut() {
            None => Poll::Ready(Err(Error::closed())),
            Some(handle) => Pin::new(handle).poll(cx).map(|res| res.and_then(|res| res)),
        }
    }
}

/// A memory-bounded cache whose entries in use are never evicted.
///
/// Every successful [`PinningCache::get`] pins the entry by increasing its reference count, every
/// [`PinningCache::release`] undoes one pin. Pinned bytes are taken out of the budget of the eviction policy, which
/// only ranks and evicts the unpinned entries, so `pinned + evictable <= max_size_bytes` holds whenever the cache is
/// quiescent.
///
/// Concurrent `get`s of a key share one population. The pin and unpin run as background tasks after the slot of the
/// key has been updated.
pub struct PinningCache<K, E>
where
    K: Key,
    E: Entry<K>,
{
    inner: Arc<PinningCacheInner<K, E>>,
}

impl<K, E> Clone for PinningCache<K, E>
where
    K: Key,
    E: Entry<K>,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, E> Debug for PinningCache<K, E>
where
    K: Key,
    E: Entry<K>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinningCache")
            .field("name", &self.inner.name)
            .field("max_size_bytes", &self.inner.max_size_bytes)
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl<K, E> PinningCache<K, E>
where
    K: Key,
    E: Entry<K>,
{
    /// Get the entry of `key` pinned, loading it with `loader` on a miss.
    ///
    /// `loader` is called in the atomic update of the slot and must only build the future. The future runs in the
    /// background and is shared by every concurrent `get` of the key. Each successful `get` adds one reference and
    /// must be paired with a [`PinningCache::release`].
    ///
    /// A failed load is not cached and fails with [`ErrorKind::External`]. If the slot is invalidated before the
    /// loaded entry is pinned, the `get` fails with [`ErrorKind::Invalidated`].
    pub fn get<F, FU, ER>(&self, key: K, loader: F) -> GetFuture<E>
    where
        F: FnOnce(&K) -> FU,
        FU: Future<Output = std::result::Result<E, ER>> + Send + 'static,
        ER: Into<anyhow::Error> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return GetFuture { inner: None };
        }

        let (slot, hit) = self.inner.policy.compute(key.clone(), |key, current| match current {
            Some(slot) => {
                slot.begin_pin();
                (Compute::Retain, (slot.clone(), true))
            }
            None => {
                let slot = Slot::populate(loader(key));
                slot.begin_pin();
                (Compute::Insert(slot.clone()), (slot, false))
            }
        });

        if hit {
            self.inner.metrics.hit.increase(1);
        } else {
            self.inner.metrics.miss.increase(1);
        }

        let pin = self.inner.quiescence.track(self.inner.clone().pin(key, slot));
        GetFuture {
            inner: Some(self.inner.spawner.spawn(pin)),
        }
    }

    /// Release one pin of `key`. The entry becomes evictable again when its last pin is released.
    ///
    /// The release runs in the background, await the handle to wait for it.
    ///
    /// # Panics
    ///
    /// Awaiting the handle panics if the entry is released more times than it was pinned.
    pub fn release(&self, key: K) -> SpawnHandle<()> {
        let inner = self.inner.clone();
        self.inner
            .spawner
            .spawn(self.inner.quiescence.track(async move { inner.unpin(key) }))
    }

    /// Remove the slot of `key`, pinned or not, then wait (bounded) for the background cleanup.
    ///
    /// The entry's hook is called with [`pincache_common::event::Event::Remove`]. The bytes of a pinned entry go back
    /// to the budget of the eviction policy, so its holders should not release it afterwards.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "pincache::cache::invalidate"))]
    pub async fn invalidate(&self, key: &K) {
        if let Some(slot) = self.inner.policy.remove(key) {
            if let Some(entry) = slot.resolved() {
                if entry.refs().count() > 0 {
                    self.inner.update_pinned_bytes(-(entry.weight() as i64));
                }
            }
        }
        self.inner.quiesce().await;
    }

    /// Remove every slot, then wait (bounded) for the background cleanup.
    ///
    /// The hooks are called with [`pincache_common::event::Event::Clear`]. Idempotent. `get` fails with
    /// [`ErrorKind::Closed`] afterwards.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "pincache::cache::close"))]
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut pinned = self.inner.pinned_bytes.lock();
            self.inner.policy.clear();
            *pinned = 0;
            self.inner.policy.resize(self.inner.max_size_bytes);
        }
        self.inner.quiesce().await;
        tracing::debug!("[pinning cache]: {} closed", self.inner.name);
    }

    /// Snapshot of the byte accounting, reused for the configured stats ttl.
    pub fn stats(&self) -> Stats {
        self.inner.stats()
    }

    /// The resolved entry of `key`, without pinning it nor touching its rank.
    pub fn peek(&self, key: &K) -> Option<Arc<E>> {
        let slot = self.inner.policy.peek(key)?;
        slot.resolved().cloned()
    }

    /// Return `true` if `key` has a slot, resolved or in flight.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.policy.contains(key)
    }

    /// Count of the slots, resolved or in flight.
    pub fn len(&self) -> usize {
        self.inner.policy.len()
    }

    /// Return `true` if there is no slot.
    pub fn is_empty(&self) -> bool {
        self.inner.policy.is_empty()
    }

    /// Current pinned bytes.
    pub fn pinned_bytes(&self) -> u64 {
        self.inner.pinned()
    }

    /// Current evictable bytes.
    pub fn evictable_bytes(&self) -> u64 {
        self.inner.policy.usage()
    }

    /// Current capacity of the eviction policy, i.e. `max_size_bytes` minus the pinned bytes.
    pub fn evictable_capacity(&self) -> u64 {
        self.inner.policy.capacity()
    }

    /// The byte budget of the cache.
    pub fn max_size_bytes(&self) -> u64 {
        self.inner.max_size_bytes
    }

    /// The name of the cache.
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

#[cfg(test)]
mod tests {
    use pincache_common::event::Event;

    use super::*;
    use crate::test_utils::TestEntry;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<PinningCache<u64, TestEntry>>();
        is_send_sync_static::<GetFuture<TestEntry>>();
    }

    fn cache(max_size_bytes: u64) -> PinningCache<u64, TestEntry> {
        PinningCacheBuilder::new(max_size_bytes)
            .with_shards(1)
            .with_stats_ttl(Duration::ZERO)
            .with_quiescence_timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    async fn load(cache: &PinningCache<u64, TestEntry>, key: u64, weight: u64) -> Arc<TestEntry> {
        cache
            .get(key, move |_| async move { Ok::<_, anyhow::Error>(TestEntry::new(weight)) })
            .await
            .unwrap()
    }

    #[test]
    fn test_build_without_runtime() {
        let res = PinningCacheBuilder::<u64, TestEntry>::new(1024).build();
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Config);

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let res = PinningCacheBuilder::<u64, TestEntry>::new(1024)
            .with_spawner(runtime.handle().clone())
            .build();
        assert!(res.is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn test_build_with_zero_shards() {
        let res = PinningCacheBuilder::<u64, TestEntry>::new(1024).with_shards(0).build();
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Config);
    }

    #[test_log::test(tokio::test)]
    async fn test_pin_and_unpin() {
        let cache = cache(1000);

        let entry = load(&cache, 1, 100).await;
        assert_eq!(Entry::<u64>::refs(&*entry).count(), 1);
        assert_eq!(cache.pinned_bytes(), 100);
        assert_eq!(cache.evictable_bytes(), 0);
        assert_eq!(cache.evictable_capacity(), 900);

        let again = load(&cache, 1, 100).await;
        assert!(Arc::ptr_eq(&entry, &again));
        assert_eq!(Entry::<u64>::refs(&*entry).count(), 2);
        assert_eq!(cache.pinned_bytes(), 100);

        cache.release(1).await.unwrap();
        assert_eq!(cache.pinned_bytes(), 100);
        cache.release(1).await.unwrap();
        assert_eq!(Entry::<u64>::refs(&*entry).count(), 0);
        assert_eq!(cache.pinned_bytes(), 0);
        assert_eq!(cache.evictable_bytes(), 100);
        assert_eq!(cache.evictable_capacity(), 1000);
    }

    #[test_log::test(tokio::test)]
    async fn test_stats() {
        let cache = cache(1000);
        load(&cache, 1, 300).await;
        load(&cache, 2, 200).await;
        cache.release(2).await.unwrap();

        assert_eq!(
            cache.stats(),
            Stats {
                pinned_bytes: 300,
                evictable_bytes: 200,
                free_bytes: 500,
            }
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_peek_does_not_pin() {
        let cache = cache(1000);
        assert!(cache.peek(&1).is_none());

        load(&cache, 1, 100).await;
        cache.release(1).await.unwrap();

        let entry = cache.peek(&1).unwrap();
        assert_eq!(Entry::<u64>::refs(&*entry).count(), 0);
        assert_eq!(cache.pinned_bytes(), 0);
        assert!(cache.contains(&1));
        assert_eq!(cache.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_release_not_resident() {
        let cache = cache(1000);
        cache.release(42).await.unwrap();
        assert_eq!(cache.pinned_bytes(), 0);
        assert!(cache.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_evict_unpinned() {
        let cache = cache(1000);
        let a = load(&cache, 1, 600).await;
        let b = load(&cache, 2, 500).await;
        assert_eq!(cache.evictable_capacity(), 0);

        cache.release(2).await.unwrap();
        assert!(!cache.contains(&2));
        assert!(cache.contains(&1));
        assert_eq!(cache.evictable_capacity(), 400);

        cache.close().await;
        assert_eq!(b.evictions(), vec![(Event::Evict, 0)]);
        assert_eq!(a.evictions(), vec![(Event::Clear, 1)]);
    }

    #[test_log::test(tokio::test)]
    async fn test_closed() {
        let cache = cache(1000);
        load(&cache, 1, 100).await;
        cache.close().await;
        cache.close().await;

        assert!(cache.is_empty());
        assert_eq!(cache.pinned_bytes(), 0);
        assert_eq!(cache.evictable_capacity(), 1000);

        let res = cache
            .get(1, |_| async { Ok::<_, anyhow::Error>(TestEntry::new(100)) })
            .await;
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Closed);
    }
}

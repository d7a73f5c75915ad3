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


use std::{marker::PhantomData, sync::Arc};

use pincache_common::{
    code::Key,
    event::{Event, EventListener},
    quiescence::Quiescence,
    spawn::Spawner,
    strict_assert,
};

use crate::{cache::Slot, entry::Entry, metrics::Metrics};

/// Dispatches [`Entry::on_evict`] for every slot that leaves the eviction policy.
///
/// The hook runs on the spawner and is tracked by the quiescence tracker, so `invalidate` and `close` can wait for it.
/// A slot that leaves while its population is still in flight gets its hook once the population resolves. A slot
/// whose population failed has no entry, hence no hook.
pub(crate) struct EvictionHook<K, E> {
    spawner: Spawner,
    quiescence: Quiescence,
    metrics: Arc<Metrics>,
    _marker: PhantomData<fn(K, E)>,
}

impl<K, E> EvictionHook<K, E> {
    pub(crate) fn new(spawner: Spawner, quiescence: Quiescence, metrics: Arc<Metrics>) -> Self {
        Self {
            spawner,
            quiescence,
            metrics,
            _marker: PhantomData,
        }
    }
}

impl<K, E> EventListener for EvictionHook<K, E>
where
    K: Key,
    E: Entry<K>,
{
    type Key = K;
    type Value = Slot<E>;

    fn on_leave(&self, reason: Event, key: &K, slot: &Slot<E>) {
        match slot.peek() {
            Some(Err(_)) => return,
            Some(Ok(entry)) => {
                strict_assert!(
                    !reason.is_eviction() || entry.refs().count() == 0,
                    "pinned entry {key:?} chosen as eviction victim"
                );
                let (key, entry) = (key.clone(), entry.clone());
                let guard = self.quiescence.enter();
                self.spawner.spawn_blocking(move || {
                    let _guard = guard;
                    entry.on_evict(&key, reason);
                });
            }
            None => {
                let (key, population) = (key.clone(), slot.population());
                self.spawner.spawn(self.quiescence.track(async move {
                    if let Ok(entry) = population.await {
                        entry.on_evict(&key, reason);
                    }
                }));
            }
        }

        if reason.is_eviction() {
            self.metrics.evict.increase(1);
        } else {
            self.metrics.remove.increase(1);
        }
        tracing::trace!("[pinning cache]: slot {:?} left, reason: {:?}", key, reason);
    }
}

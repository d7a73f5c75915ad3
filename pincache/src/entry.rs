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


use std::sync::atomic::{AtomicUsize, Ordering};

use pincache_common::event::Event;

/// Reference count of an [`Entry`].
///
/// The count is only changed by the pinning cache, inside the atomic update of the entry's slot.
#[derive(Debug, Default)]
pub struct RefCount(AtomicUsize);

impl RefCount {
    /// Create a reference count of zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Increase the count by one and return the count before the increase.
    pub fn acquire(&self) -> usize {
        self.0.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrease the count by one and return the count after the decrease.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero. A release without a matching acquire is a bug of the caller and the cache
    /// accounting cannot be trusted anymore.
    pub fn release(&self) -> usize {
        match self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => panic!("reference count released more times than acquired"),
        }
    }
}

/// An object held by the pinning cache.
///
/// An entry is pinned while its reference count is positive. A pinned entry weighs nothing for the eviction policy,
/// its bytes are accounted as pinned instead.
pub trait Entry<K>: Send + Sync + 'static {
    /// Byte weight of the entry. Must not change during the lifetime of the entry.
    fn weight(&self) -> u64;

    /// Reference count of the entry.
    fn refs(&self) -> &RefCount;

    /// Called exactly once when the entry leaves the cache, with the reason.
    ///
    /// Called on a background thread, out of any lock of the cache.
    #[expect(unused_variables)]
    fn on_evict(&self, key: &K, reason: Event) {}
}

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

/// The reason an entry leaves a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Reclaimed by the eviction policy under size pressure.
    Evict,
    /// Replaced by another value for the same key.
    Replace,
    /// Explicitly removed, e.g. by invalidation.
    Remove,
    /// Dropped by a whole-cache clear, e.g. on close.
    Clear,
}

impl Event {
    /// Returns `true` if the entry was reclaimed by the eviction policy rather than removed by the user.
    pub fn is_eviction(&self) -> bool {
        matches!(self, Event::Evict)
    }
}

/// Trait for the customized event listener.
pub trait EventListener: Send + Sync + 'static {
    /// Associated key type.
    type Key;
    /// Associated value type.
    type Value;

    /// Called when a cache entry leaves the cache with the reason.
    ///
    /// The listener is always called out of any lock critical section of the cache.
    #[expect(unused_variables)]
    fn on_leave(&self, reason: Event, key: &Self::Key, value: &Self::Value) {}
}

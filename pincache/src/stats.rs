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


use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// A snapshot of the byte accounting of a pinning cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Bytes of the entries held by at least one caller.
    pub pinned_bytes: u64,
    /// Bytes of the resident entries that can be evicted.
    pub evictable_bytes: u64,
    /// Bytes neither pinned nor evictable.
    pub free_bytes: u64,
}

/// Memoizes a [`Stats`] snapshot for a fixed interval.
#[derive(Debug)]
pub(crate) struct StatsCache {
    ttl: Duration,
    cached: Mutex<Option<(Instant, Stats)>>,
}

impl StatsCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Return the memoized snapshot, or compute a new one with `f` if the memoized one has expired.
    ///
    /// `f` runs under the lock of the memo, so concurrent callers compute only once.
    pub(crate) fn get_or_refresh<F>(&self, f: F) -> Stats
    where
        F: FnOnce() -> Stats,
    {
        let mut cached = self.cached.lock();
        let now = Instant::now();
        match cached.as_ref() {
            Some((at, stats)) if now.duration_since(*at) < self.ttl => *stats,
            _ => {
                let stats = f();
                *cached = Some((now, stats));
                stats
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stats_memoized() {
        let cache = StatsCache::new(Duration::from_secs(2));
        let computed = AtomicU64::new(0);
        let compute = || Stats {
            pinned_bytes: computed.fetch_add(1, Ordering::Relaxed) + 1,
            ..Default::default()
        };

        assert_eq!(cache.get_or_refresh(compute).pinned_bytes, 1);
        tokio::time::advance(Duration::from_millis(1999)).await;
        assert_eq!(cache.get_or_refresh(compute).pinned_bytes, 1);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get_or_refresh(compute).pinned_bytes, 2);
        assert_eq!(computed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_zero_ttl_always_refreshes() {
        let cache = StatsCache::new(Duration::ZERO);
        let mut n = 0;
        for _ in 0..3 {
            cache.get_or_refresh(|| {
                n += 1;
                Stats::default()
            });
        }
        assert_eq!(n, 3);
    }
}

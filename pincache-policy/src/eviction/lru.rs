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


use hashlink::LinkedHashSet;
use pincache_common::code::Key;
use serde::{Deserialize, Serialize};

use super::Eviction;

/// Lru eviction algorithm config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LruConfig;

/// Least-recently-used eviction.
///
/// An access moves the key to the back of the queue, victims are popped from the front.
#[derive(Debug)]
pub struct Lru<K>
where
    K: Key,
{
    queue: LinkedHashSet<K>,
}

impl<K> Lru<K>
where
    K: Key,
{
    /// Create an empty lru queue.
    pub fn new(_config: &LruConfig) -> Self {
        Self {
            queue: LinkedHashSet::new(),
        }
    }
}

impl<K> Eviction<K> for Lru<K>
where
    K: Key,
{
    fn push(&mut self, key: K) {
        let inserted = self.queue.insert(key);
        pincache_common::strict_assert!(inserted);
    }

    fn access(&mut self, key: &K) {
        if self.queue.remove(key) {
            self.queue.insert(key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> bool {
        self.queue.remove(key)
    }

    fn pop(&mut self) -> Option<K> {
        self.queue.pop_front()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    fn dump(lru: &Lru<u64>) -> Vec<u64> {
        lru.queue.iter().copied().collect_vec()
    }

    #[test]
    fn test_lru() {
        let mut lru = Lru::new(&LruConfig);
        (0..8).for_each(|i| lru.push(i));
        assert_eq!(dump(&lru), (0..8).collect_vec());

        lru.access(&0);
        lru.access(&3);
        assert_eq!(dump(&lru), vec![1, 2, 4, 5, 6, 7, 0, 3]);

        // Not tracked keys are ignored.
        lru.access(&42);
        assert_eq!(lru.len(), 8);

        assert!(lru.remove(&5));
        assert!(!lru.remove(&5));
        assert_eq!(lru.pop(), Some(1));
        assert_eq!(lru.pop(), Some(2));
        assert_eq!(dump(&lru), vec![4, 6, 7, 0, 3]);

        lru.clear();
        assert!(lru.is_empty());
        assert_eq!(lru.pop(), None);
    }
}

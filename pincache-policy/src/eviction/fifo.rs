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

/// Fifo eviction algorithm config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoConfig;

/// First-in-first-out eviction, accesses do not change the order.
#[derive(Debug)]
pub struct Fifo<K>
where
    K: Key,
{
    queue: LinkedHashSet<K>,
}

impl<K> Fifo<K>
where
    K: Key,
{
    /// Create an empty fifo queue.
    pub fn new(_config: &FifoConfig) -> Self {
        Self {
            queue: LinkedHashSet::new(),
        }
    }
}

impl<K> Eviction<K> for Fifo<K>
where
    K: Key,
{
    fn push(&mut self, key: K) {
        let inserted = self.queue.insert(key);
        pincache_common::strict_assert!(inserted);
    }

    fn access(&mut self, _: &K) {}

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

    #[test]
    fn test_fifo() {
        let mut fifo = Fifo::new(&FifoConfig);
        (0..8).for_each(|i| fifo.push(i));

        fifo.access(&0);
        assert!(fifo.remove(&1));
        assert_eq!(fifo.pop(), Some(0));
        assert_eq!(fifo.pop(), Some(2));
        assert_eq!(fifo.queue.iter().copied().collect_vec(), vec![3, 4, 5, 6, 7]);
    }
}

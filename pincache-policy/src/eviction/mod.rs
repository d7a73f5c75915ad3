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


use pincache_common::code::Key;
use serde::{Deserialize, Serialize};

use self::{
    fifo::{Fifo, FifoConfig},
    lru::{Lru, LruConfig},
};

/// Cache eviction algorithm abstraction.
///
/// The algorithm only ranks keys. Weights and values are owned by the cache shard, which pushes a key when the entry
/// becomes a candidate and removes it when the entry leaves or stops being a candidate.
pub trait Eviction<K>: Send + Sync + 'static {
    /// Push a key into the algorithm.
    ///
    /// The caller guarantees that the key is NOT in the algorithm.
    fn push(&mut self, key: K);

    /// Record an access to a key that is in the algorithm.
    fn access(&mut self, key: &K);

    /// Remove a key from the algorithm, return `false` if it was not there.
    fn remove(&mut self, key: &K) -> bool;

    /// Pop the next victim.
    fn pop(&mut self) -> Option<K>;

    /// Remove all keys.
    fn clear(&mut self);

    /// Return the count of the keys in the algorithm.
    fn len(&self) -> usize;

    /// Return if the algorithm holds no key.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Eviction algorithm config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionConfig {
    /// Lru eviction algorithm config.
    Lru(LruConfig),
    /// Fifo eviction algorithm config.
    Fifo(FifoConfig),
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self::Lru(LruConfig::default())
    }
}

impl From<LruConfig> for EvictionConfig {
    fn from(value: LruConfig) -> Self {
        Self::Lru(value)
    }
}

impl From<FifoConfig> for EvictionConfig {
    fn from(value: FifoConfig) -> Self {
        Self::Fifo(value)
    }
}

impl EvictionConfig {
    /// Create an eviction algorithm instance for one cache shard.
    pub fn build<K>(&self) -> Box<dyn Eviction<K>>
    where
        K: Key,
    {
        match self {
            EvictionConfig::Lru(config) => Box::new(Lru::new(config)),
            EvictionConfig::Fifo(config) => Box::new(Fifo::new(config)),
        }
    }
}

pub mod fifo;
pub mod lru;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_config_serde() {
        let config = EvictionConfig::from(FifoConfig::default());
        let json = serde_json::to_string(&config).unwrap();
        let restored: EvictionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);

        assert_eq!(EvictionConfig::default(), EvictionConfig::Lru(LruConfig::default()));
    }

    #[test]
    fn test_build_from_config() {
        for config in [EvictionConfig::default(), FifoConfig::default().into()] {
            let mut eviction = config.build::<u64>();
            eviction.push(1);
            eviction.push(2);
            assert_eq!(eviction.len(), 2);
            assert_eq!(eviction.pop(), Some(1));
            assert!(!eviction.is_empty());
        }
    }
}

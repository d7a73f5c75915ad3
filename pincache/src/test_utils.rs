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


//! Utilities for testing.

use parking_lot::Mutex;
use pincache_common::event::Event;

use crate::entry::{Entry, RefCount};

/// An entry that records the reasons it was evicted with, and its reference count at that time.
#[derive(Debug, Default)]
pub struct TestEntry {
    weight: u64,
    refs: RefCount,
    evictions: Mutex<Vec<(Event, usize)>>,
}

impl TestEntry {
    /// Create a test entry with the given weight.
    pub fn new(weight: u64) -> Self {
        Self {
            weight,
            ..Default::default()
        }
    }

    /// The recorded `(reason, refs)` of every hook call.
    pub fn evictions(&self) -> Vec<(Event, usize)> {
        self.evictions.lock().clone()
    }
}

impl<K> Entry<K> for TestEntry {
    fn weight(&self) -> u64 {
        self.weight
    }

    fn refs(&self) -> &RefCount {
        &self.refs
    }

    fn on_evict(&self, _: &K, reason: Event) {
        self.evictions.lock().push((reason, self.refs.count()));
    }
}

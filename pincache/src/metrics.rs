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


use std::borrow::Cow;

use pincache_common::metrics::{BoxedCounter, BoxedGauge, RegistryOps};

use crate::stats::Stats;

/// Counters and gauges of one pinning cache instance, told apart by the `name` label.
#[derive(Debug)]
pub(crate) struct Metrics {
    pub(crate) hit: BoxedCounter,
    pub(crate) miss: BoxedCounter,
    pub(crate) load_error: BoxedCounter,
    pub(crate) pin: BoxedCounter,
    pub(crate) unpin: BoxedCounter,
    pub(crate) evict: BoxedCounter,
    pub(crate) remove: BoxedCounter,

    pub(crate) pinned_bytes: BoxedGauge,
    pub(crate) evictable_bytes: BoxedGauge,
    pub(crate) free_bytes: BoxedGauge,
}

impl Metrics {
    pub(crate) fn new(name: Cow<'static, str>, registry: &dyn RegistryOps) -> Self {
        let op_total = registry.register_counter_vec(
            "pincache_op_total".into(),
            "pinning cache operations".into(),
            &["name", "op"],
        );
        let bytes = registry.register_gauge_vec(
            "pincache_bytes".into(),
            "pinning cache byte accounting".into(),
            &["name", "kind"],
        );

        let counter = |op: &'static str| op_total.counter(&[name.clone(), op.into()]);
        let gauge = |kind: &'static str| bytes.gauge(&[name.clone(), kind.into()]);

        Self {
            hit: counter("hit"),
            miss: counter("miss"),
            load_error: counter("load_error"),
            pin: counter("pin"),
            unpin: counter("unpin"),
            evict: counter("evict"),
            remove: counter("remove"),

            pinned_bytes: gauge("pinned"),
            evictable_bytes: gauge("evictable"),
            free_bytes: gauge("free"),
        }
    }

    pub(crate) fn record(&self, stats: &Stats) {
        self.pinned_bytes.absolute(stats.pinned_bytes);
        self.evictable_bytes.absolute(stats.evictable_bytes);
        self.free_bytes.absolute(stats.free_bytes);
    }
}

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


pub use pincache_common::{
    code::Key,
    error::{Error, ErrorKind, Result},
    event::Event,
    metrics::{registry::noop::NoopMetricsRegistry, RegistryOps},
    spawn::{SpawnHandle, Spawner},
};
#[cfg(feature = "prometheus")]
pub use pincache_common::metrics::registry::prometheus::PrometheusMetricsRegistry;
pub use pincache_policy::eviction::{fifo::FifoConfig, lru::LruConfig, EvictionConfig};

pub use crate::{
    cache::{GetFuture, PinningCache, PinningCacheBuilder},
    entry::{Entry, RefCount},
    stats::Stats,
};

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


//! Weight-bounded eviction policy for pincache.
//!
//! [`WeightedCache`] is a lock-striped map whose total weight is kept within a capacity that can be changed at runtime.
//! Weights are obtained from a [`Weighter`] every time an entry is inserted or recomputed, so the weight of an entry may
//! change in place. Entries weighing zero are never chosen as eviction victims.

/// Eviction algorithm abstraction and implementations.
pub mod eviction;
mod weighted;

pub use weighted::{Compute, WeightedCache, WeightedCacheConfig, Weighter};

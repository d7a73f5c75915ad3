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


//! A memory-bounded cache whose entries in use are never evicted.
//!
//! Callers `get` an entry (loading it on a miss) and `release` it when done. While an entry has references it is
//! pinned: its bytes are excluded from the budget of the eviction policy, which only ever evicts unpinned entries.
//!
//! ```rust
//! use pincache::{Entry, PinningCacheBuilder, RefCount};
//!
//! struct Page {
//!     data: Vec<u8>,
//!     refs: RefCount,
//! }
//!
//! impl Entry<u64> for Page {
//!     fn weight(&self) -> u64 {
//!         self.data.len() as u64
//!     }
//!
//!     fn refs(&self) -> &RefCount {
//!         &self.refs
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> pincache::Result<()> {
//! let cache = PinningCacheBuilder::<u64, Page>::new(1024).with_name("pages").build()?;
//!
//! let page = cache
//!     .get(1, |_| async {
//!         Ok::<_, std::io::Error>(Page {
//!             data: vec![0; 256],
//!             refs: RefCount::new(),
//!         })
//!     })
//!     .await?;
//! assert_eq!(page.data.len(), 256);
//! assert_eq!(cache.pinned_bytes(), 256);
//!
//! cache.release(1).await?;
//! assert_eq!(cache.evictable_bytes(), 256);
//!
//! cache.close().await;
//! # Ok(())
//! # }
//! ```

mod cache;
mod entry;
mod listener;
mod metrics;
mod prelude;
mod stats;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use prelude::*;

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

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QuiescenceInner {
    inflight: AtomicUsize,
    notify: Notify,
}

/// Tracks in-flight background tasks, so that an operation can wait (with a bound) until the work it triggered has
/// finished before returning.
///
/// A task is counted from the moment [`Quiescence::enter`] is called, which should happen before the task is spawned,
/// until its [`QuiescenceGuard`] is dropped.
#[derive(Debug, Default, Clone)]
pub struct Quiescence {
    inner: Arc<QuiescenceInner>,
}

/// Marks one tracked task as in-flight until dropped.
#[derive(Debug)]
pub struct QuiescenceGuard {
    inner: Arc<QuiescenceInner>,
}

impl Drop for QuiescenceGuard {
    fn drop(&mut self) {
        if self.inner.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

impl Quiescence {
    /// Count a new in-flight task.
    pub fn enter(&self) -> QuiescenceGuard {
        self.inner.inflight.fetch_add(1, Ordering::AcqRel);
        QuiescenceGuard {
            inner: self.inner.clone(),
        }
    }

    /// Wrap the future so that it is counted as in-flight until it completes or is dropped.
    pub fn track<F>(&self, future: F) -> impl Future<Output = F::Output> + Send + 'static
    where
        F: Future + Send + 'static,
    {
        let guard = self.enter();
        async move {
            let _guard = guard;
            future.await
        }
    }

    /// Count of tracked tasks that have not finished yet.
    pub fn inflight(&self) -> usize {
        self.inner.inflight.load(Ordering::Acquire)
    }

    /// Wait until there is no in-flight task, or until `timeout` elapses.
    ///
    /// Returns `true` if quiescence was reached in time.
    ///
    /// Requires the time driver of the tokio runtime to be enabled.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let quiesce = async {
            loop {
                // Register interest before checking, `notify_waiters` only wakes created `Notified` futures.
                let notified = self.inner.notify.notified();
                if self.inflight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        let quiescent = tokio::time::timeout(timeout, quiesce).await.is_ok();
        if !quiescent {
            tracing::debug!(
                "[quiescence]: still {} task(s) in flight after {:?}, stop waiting",
                self.inflight(),
                timeout
            );
        }
        quiescent
    }
}

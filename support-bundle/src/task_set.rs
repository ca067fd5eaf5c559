// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio::task::Id;
use tokio::task::JoinError;
use tokio::task::JoinSet;

/// A set of tokio tasks of which at most `max_parallelism` run at once.
///
/// Every task is spawned onto the [JoinSet] immediately, but waits on a
/// shared semaphore before doing any work. Dropping the set aborts any
/// task that has not finished.
pub(crate) struct BoundedTaskSet<T> {
    semaphore: Arc<Semaphore>,
    set: JoinSet<T>,
}

impl<T: 'static + Send> BoundedTaskSet<T> {
    pub fn new(max_parallelism: usize) -> BoundedTaskSet<T> {
        BoundedTaskSet {
            semaphore: Arc::new(Semaphore::new(max_parallelism.max(1))),
            set: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, future: F) -> AbortHandle
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        self.set.spawn(async move {
            // The semaphore is never closed, so this always yields a permit.
            let _permit = semaphore.acquire_owned().await.ok();
            future.await
        })
    }

    /// Waits for the next task to finish, returning it with the [Id] of
    /// the task that produced it. A task that panicked reports its [Id]
    /// through [JoinError::id].
    ///
    /// Returns `None` once every spawned task has been joined.
    pub async fn join_next_with_id(
        &mut self,
    ) -> Option<Result<(Id, T), JoinError>> {
        self.set.join_next_with_id().await
    }
}

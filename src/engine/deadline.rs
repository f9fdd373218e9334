//! Cancellable deferred work keyed by ride id.
//!
//! The no-accept deadline for a dispatch round is a spawned task that
//! sleeps and then runs its check. When the ride resolves early (accept or
//! cancel) the task is aborted, so stale callbacks never fire against an
//! already-resolved ride.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use uuid::Uuid;

#[derive(Default)]
pub struct DeadlineScheduler {
    handles: DashMap<Uuid, AbortHandle>,
}

impl DeadlineScheduler {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }

    /// Schedules `work` to run after `delay`, replacing any deadline
    /// already pending for this ride.
    pub fn schedule<F>(&self, ride_id: Uuid, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        });

        if let Some(previous) = self.handles.insert(ride_id, handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Aborting is safe even from inside the deadline task itself: the
    /// abort lands at the next yield point, and the resolution work the
    /// task runs is synchronous.
    pub fn cancel(&self, ride_id: Uuid) {
        if let Some((_, handle)) = self.handles.remove(&ride_id) {
            handle.abort();
        }
    }
}

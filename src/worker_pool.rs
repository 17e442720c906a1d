//! Fixed-size pool of exclusively owned worker resources
//!
//! Every slot is created once at startup and destroyed once at teardown.
//! Checking a worker out moves its resource into a [`WorkerLease`]; handing
//! the lease back to [`WorkerPool::release`] moves it home again. Selection
//! among free workers is least-recently-used.

use crate::{ResourceFactory, ScrapeError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One slot of the pool
///
/// While the worker is checked out its resource lives in the lease, so
/// `resource` is `None` exactly when `is_available` is false.
#[derive(Debug)]
pub struct WorkerHandle<R> {
    /// Stable identifier, unique within the pool
    pub id: usize,
    resource: Option<R>,
    /// Free for checkout
    pub is_available: bool,
    /// Last transition from checked out to free (creation time until first use)
    pub last_used: Instant,
    /// Pool-wide release counter value at the last release
    release_seq: u64,
    /// Number of times this worker has been checked out
    pub checkouts: usize,
}

impl<R> WorkerHandle<R> {
    fn new(id: usize, resource: R, created_at: Instant) -> Self {
        Self {
            id,
            resource: Some(resource),
            is_available: true,
            last_used: created_at,
            release_seq: 0,
            checkouts: 0,
        }
    }

    fn lru_key(&self) -> (Instant, u64, usize) {
        (self.last_used, self.release_seq, self.id)
    }
}

/// Exclusive access to one worker's resource until released
#[derive(Debug)]
pub struct WorkerLease<R> {
    pool_id: Uuid,
    id: usize,
    resource: R,
}

impl<R> WorkerLease<R> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn resource_mut(&mut self) -> &mut R {
        &mut self.resource
    }
}

struct PoolState<R> {
    handles: Vec<WorkerHandle<R>>,
    release_seq: u64,
    closed: bool,
}

struct PoolShared<R> {
    id: Uuid,
    size: usize,
    state: Mutex<PoolState<R>>,
    released: Notify,
}

pub struct WorkerPool<R> {
    shared: Arc<PoolShared<R>>,
}

impl<R> Clone for WorkerPool<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Send + 'static> WorkerPool<R> {
    /// Builds a pool around already created resources; ids follow vector order.
    pub fn new(resources: Vec<R>) -> Self {
        let created_at = Instant::now();
        let handles: Vec<_> = resources
            .into_iter()
            .enumerate()
            .map(|(id, resource)| WorkerHandle::new(id, resource, created_at))
            .collect();

        Self {
            shared: Arc::new(PoolShared {
                id: Uuid::new_v4(),
                size: handles.len(),
                state: Mutex::new(PoolState {
                    handles,
                    release_seq: 0,
                    closed: false,
                }),
                released: Notify::new(),
            }),
        }
    }

    /// Creates `size` resources one after another.
    ///
    /// If any creation fails, the resources created so far are destroyed
    /// before the error is returned.
    pub async fn launch<F>(factory: &F, size: usize) -> Result<Self, ScrapeError>
    where
        F: ResourceFactory<Resource = R>,
    {
        let mut resources = Vec::with_capacity(size);

        for id in 0..size {
            match factory.create(id).await {
                Ok(resource) => {
                    debug!(worker_id = id, "worker created");
                    resources.push(resource);
                }
                Err(e) => {
                    error!(worker_id = id, error = %e, "failed to create worker");
                    for (created_id, resource) in resources.into_iter().enumerate() {
                        if let Err(destroy_err) = factory.destroy(created_id, resource).await {
                            warn!(
                                worker_id = created_id,
                                error = %destroy_err,
                                "failed to destroy worker after startup failure"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!("Worker pool initialized with {} workers", resources.len());
        Ok(Self::new(resources))
    }

    fn state(&self) -> MutexGuard<'_, PoolState<R>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Checks out the least recently used free worker, if any. Never waits.
    pub fn try_acquire(&self) -> Option<WorkerLease<R>> {
        let mut state = self.state();
        if state.closed {
            return None;
        }

        let handle = state
            .handles
            .iter_mut()
            .filter(|handle| handle.is_available)
            .min_by_key(|handle| handle.lru_key())?;

        let resource = handle.resource.take()?;
        handle.is_available = false;
        handle.checkouts += 1;

        Some(WorkerLease {
            pool_id: self.shared.id,
            id: handle.id,
            resource,
        })
    }

    /// Returns a worker to the pool and wakes one waiter.
    pub fn release(&self, lease: WorkerLease<R>) {
        let WorkerLease {
            pool_id,
            id,
            resource,
        } = lease;

        if pool_id != self.shared.id {
            error!(worker_id = id, "lease released into a foreign pool; dropping it");
            return;
        }

        {
            let mut state = self.state();
            if state.closed {
                warn!(worker_id = id, "worker released after teardown; dropping its resource");
                return;
            }

            state.release_seq += 1;
            let seq = state.release_seq;
            match state.handles.iter_mut().find(|handle| handle.id == id) {
                Some(handle) if !handle.is_available => {
                    handle.resource = Some(resource);
                    handle.is_available = true;
                    handle.last_used = Instant::now();
                    handle.release_seq = seq;
                }
                Some(_) => {
                    error!(worker_id = id, "worker released while already available");
                    return;
                }
                None => {
                    error!(worker_id = id, "released worker does not belong to this pool");
                    return;
                }
            }
        }

        self.shared.released.notify_one();
    }

    /// Waits until some worker is released or `max_wait` elapses.
    ///
    /// Returns `true` when woken by a release. A release that happened since
    /// the last wait is remembered, so a release racing with a failed
    /// [`try_acquire`](Self::try_acquire) is never missed.
    pub async fn wait_for_release(&self, max_wait: Duration) -> bool {
        tokio::time::timeout(max_wait, self.shared.released.notified())
            .await
            .is_ok()
    }

    /// Closes the pool and destroys every resource it holds, once.
    ///
    /// Workers still checked out are reported as outstanding; their resources
    /// are dropped when the lease comes back. Calling this again is a no-op.
    pub async fn teardown_all<F>(&self, factory: &F) -> TeardownReport
    where
        F: ResourceFactory<Resource = R>,
    {
        let (resources, outstanding) = {
            let mut state = self.state();
            if state.closed {
                return TeardownReport::default();
            }
            state.closed = true;

            let mut resources = Vec::with_capacity(state.handles.len());
            let mut outstanding = 0;
            for handle in state.handles.iter_mut() {
                handle.is_available = false;
                match handle.resource.take() {
                    Some(resource) => resources.push((handle.id, resource)),
                    None => outstanding += 1,
                }
            }
            (resources, outstanding)
        };

        self.shared.released.notify_waiters();

        if outstanding > 0 {
            warn!(outstanding, "tearing down pool with workers still checked out");
        }

        let mut report = TeardownReport {
            outstanding,
            ..Default::default()
        };

        for (id, resource) in resources {
            match factory.destroy(id, resource).await {
                Ok(()) => report.destroyed += 1,
                Err(e) => {
                    error!(worker_id = id, error = %e, "failed to destroy worker");
                    report.failures += 1;
                }
            }
        }

        info!(
            destroyed = report.destroyed,
            failures = report.failures,
            "Worker pool teardown complete"
        );
        report
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state();
        let available = state
            .handles
            .iter()
            .filter(|handle| handle.is_available)
            .count();

        PoolStats {
            total: state.handles.len(),
            available,
            checked_out: state
                .handles
                .iter()
                .filter(|handle| handle.resource.is_none())
                .count(),
            total_checkouts: state.handles.iter().map(|handle| handle.checkouts).sum(),
            closed: state.closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub checked_out: usize,
    pub total_checkouts: usize,
    pub closed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub destroyed: usize,
    pub failures: usize,
    pub outstanding: usize,
}

//! Generic resource pool driven by a [`Factory`].
//!
//! `Pool<F>` hands out [`Lease`]s on `F::Resource` values, creating,
//! validating, resetting and destroying them through the factory. Every
//! factory call is timed; a call that overruns is abandoned rather than
//! cancelled and its late result is cleaned up when it arrives.

mod driver;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
#[cfg(feature = "serde")]
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::command::SerialLock;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::events::{Event, EventBus};
use crate::factory::Factory;
use crate::latch::Latch;
use crate::lease::Lease;
use crate::queue::RequestQueue;
use crate::repository::Repository;
use crate::request::{AcquireRequest, Purpose, RequestId};
use crate::slot::SlotState;

/// Identifies one pool instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(Uuid);

impl PoolId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PoolState {
    /// Created, not yet started.
    NotStarted,
    /// `start()` in progress.
    Starting,
    /// Serving requests.
    Started,
    /// `stop()` in progress.
    Stopping,
    /// Stopped for good.
    Stopped,
}

impl PoolState {
    /// Lower-case state name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    fn not_running(self) -> PoolError {
        PoolError::PoolNotRunning { state: self.name() }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolStats {
    /// Requests waiting for a slot.
    pub queued: usize,
    /// Requests being served or backing off.
    pub acquiring: usize,
    /// Idle resources.
    pub idle: usize,
    /// Resources held by callers.
    pub acquired: usize,
    /// Released resources being reset.
    pub reinstating: usize,
    /// Resources being destroyed.
    pub doomed: usize,
    /// Slots whose factory call overran or was abandoned.
    pub timedout: usize,
    /// Slots whose resource could not be destroyed.
    pub zombie: usize,
    /// Slots counting towards `max_size`. Timed out and zombie slots
    /// don't.
    pub size: usize,
    /// Resources obtainable without waiting for one to be released.
    pub available: usize,
    /// Largest size reached.
    pub peak: usize,
}

/// Everything behind the pool's lock.
struct Core<F: Factory> {
    phase: PoolState,
    queue: RequestQueue<Option<Lease<F::Resource>>>,
    repository: Repository<F::Resource>,
    /// Paces replenishment after provisioning failures.
    replenish: Backoff,
    holdoff: Option<Instant>,
    /// Set once `stop()` starts destroying resources.
    culling: bool,
    drained: Latch,
}

/// State shared by every handle to one pool.
struct Shared<F: Factory> {
    id: PoolId,
    factory: Arc<F>,
    config: PoolConfig,
    core: Mutex<Core<F>>,
    events: EventBus,
    creating: SerialLock,
    destroying: SerialLock,
    starting: Latch<PoolResult<()>>,
    stopping: Latch<PoolResult<()>>,
}

/// Generic resource pool.
///
/// Cheap to clone; clones share the same resources.
pub struct Pool<F: Factory> {
    inner: Arc<Shared<F>>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Factory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

enum Pending<T> {
    Start(T),
    Stop(T),
}

impl<F: Factory> Pool<F> {
    /// Create a pool. Nothing is created until `start()` or the first
    /// `acquire()`.
    ///
    /// # Errors
    ///
    /// `PoolError::Configuration` if `config` is invalid.
    pub fn new(factory: F, config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;
        let core = Core {
            phase: PoolState::NotStarted,
            queue: RequestQueue::new(config.max_queue_size),
            repository: Repository::new(&config),
            replenish: Backoff::new(config.backoff),
            holdoff: None,
            culling: false,
            drained: Latch::new(),
        };
        Ok(Self {
            inner: Arc::new(Shared {
                id: PoolId::new(),
                factory: Arc::new(factory),
                config,
                core: Mutex::new(core),
                events: EventBus::default(),
                creating: SerialLock::default(),
                destroying: SerialLock::default(),
                starting: Latch::new(),
                stopping: Latch::new(),
            }),
        })
    }

    /// This pool's identifier.
    #[must_use]
    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    /// The configuration the pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.core.lock().phase
    }

    /// Subscribe to pool events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Provision the minimum number of resources and start serving.
    ///
    /// Concurrent callers share the outcome of the first.
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` once started, `PoolNotRunning` once stopping, and
    /// `OperationTimedOut` if provisioning overran `start_timeout`. A
    /// timed out pool returns to `NotStarted` and may be started again.
    pub async fn start(&self) -> PoolResult<()> {
        let inner = &self.inner;
        let wait = {
            let mut core = inner.core.lock();
            match core.phase {
                PoolState::NotStarted => {
                    core.phase = PoolState::Starting;
                    inner.starting.activate();
                    inner.events.emit(Event::PoolStarting);
                    None
                }
                PoolState::Starting => Some(inner.starting.block()),
                PoolState::Started => return Err(PoolError::AlreadyStarted),
                phase => return Err(phase.not_running()),
            }
        };
        if let Some(wait) = wait {
            return wait.await.unwrap_or(Ok(()));
        }

        let started = Instant::now();
        tracing::info!(pool = %inner.id, min_size = inner.config.min_size, "starting pool");
        let receivers = inner.update(|core, batch| {
            let wanted = core.repository.deficit();
            let mut receivers = Vec::with_capacity(wanted);
            for _ in 0..wanted {
                let (request, receiver) = AcquireRequest::new(
                    RequestId::new(),
                    Purpose::Initialise,
                    inner.config.backoff,
                );
                let id = request.id().clone();
                match core.queue.add(request) {
                    Ok(()) => {
                        inner.events.emit(Event::RequestQueued { request: id });
                        receivers.push(receiver);
                    }
                    Err(err) => inner.report(&err),
                }
            }
            batch.advance = true;
            receivers
        });

        let result = match tokio::time::timeout(
            inner.config.start_timeout,
            futures::future::join_all(receivers),
        )
        .await
        {
            Ok(settled) => {
                for outcome in settled {
                    if let Ok(Err(err)) = outcome {
                        tracing::warn!(pool = %inner.id, error = %err, "initial provisioning failed");
                    }
                }
                Ok(())
            }
            Err(_) => Err(PoolError::timed_out("start", inner.config.start_timeout)),
        };

        inner.update(|core, batch| {
            match &result {
                Ok(()) => {
                    core.phase = PoolState::Started;
                    let duration = started.elapsed();
                    tracing::info!(pool = %inner.id, ?duration, "pool started");
                    inner.events.emit(Event::PoolStarted { duration });
                    batch.advance = true;
                }
                Err(error) => {
                    tracing::warn!(pool = %inner.id, %error, "pool start timed out");
                    let reason = PoolError::aborted("initialise");
                    for request in core.queue.ids(Purpose::Initialise) {
                        inner.abort(core, &request, reason.clone(), batch);
                    }
                    core.phase = PoolState::NotStarted;
                }
            }
            inner.starting.release(result.clone());
        });
        result
    }

    /// Stop the pool, destroying every resource it can.
    ///
    /// Waits for queued callers to be served, aborts any still waiting,
    /// then destroys idle resources and every resource released from here
    /// on. Resolves once only timed out and zombie slots remain. Calling
    /// `stop()` again, or concurrently, shares the first call's outcome.
    ///
    /// # Errors
    ///
    /// `OperationTimedOut` if the pool did not drain within
    /// `stop_timeout`. The pool is stopped either way.
    pub async fn stop(&self) -> PoolResult<()> {
        let inner = &self.inner;
        loop {
            let pending = {
                let mut core = inner.core.lock();
                match core.phase {
                    PoolState::NotStarted => {
                        core.phase = PoolState::Stopped;
                        core.culling = true;
                        inner.events.emit(Event::PoolStopping);
                        inner.events.emit(Event::PoolStopped {
                            duration: std::time::Duration::ZERO,
                        });
                        return Ok(());
                    }
                    PoolState::Starting => Pending::Start(inner.starting.block()),
                    PoolState::Started => {
                        core.phase = PoolState::Stopping;
                        inner.stopping.activate();
                        inner.events.emit(Event::PoolStopping);
                        break;
                    }
                    PoolState::Stopping => Pending::Stop(inner.stopping.block()),
                    PoolState::Stopped => return Ok(()),
                }
            };
            match pending {
                Pending::Start(wait) => {
                    wait.await;
                }
                Pending::Stop(wait) => return wait.await.unwrap_or(Ok(())),
            }
        }

        let started = Instant::now();
        tracing::info!(pool = %inner.id, "stopping pool");
        let result = inner.shutdown(started + inner.config.stop_timeout).await;

        inner.update(|core, _| {
            core.phase = PoolState::Stopped;
            let duration = started.elapsed();
            match &result {
                Ok(()) => tracing::info!(pool = %inner.id, ?duration, "pool stopped"),
                Err(error) => tracing::warn!(pool = %inner.id, %error, "pool stop timed out"),
            }
            inner.events.emit(Event::PoolStopped { duration });
            inner.stopping.release(result.clone());
        });
        result
    }

    /// Acquire a resource, starting the pool if needed.
    ///
    /// # Errors
    ///
    /// `PoolNotRunning` once the pool is stopping, `MaxQueueSizeExceeded`
    /// if too many callers are waiting, and `OperationTimedOut` if no
    /// resource arrived within `acquire_timeout` or the resource's own
    /// create or validate call timed out.
    pub async fn acquire(&self) -> PoolResult<Lease<F::Resource>> {
        self.acquire_as(RequestId::new()).await
    }

    /// Acquire a resource under a caller chosen request id, so events
    /// about the request can be correlated with the caller.
    pub async fn acquire_as(&self, id: RequestId) -> PoolResult<Lease<F::Resource>> {
        let inner = &self.inner;
        self.ensure_started().await?;

        let mut receiver = inner.update(|core, batch| {
            if core.phase != PoolState::Started {
                return Err(core.phase.not_running());
            }
            let (request, receiver) =
                AcquireRequest::new(id.clone(), Purpose::Acquire, inner.config.backoff);
            core.queue.add(request)?;
            inner.events.emit(Event::RequestQueued {
                request: id.clone(),
            });
            batch.advance = true;
            Ok(receiver)
        })?;

        let timeout = inner.config.acquire_timeout;
        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(result)) => result?.ok_or_else(|| {
                PoolError::internal(format!("request {id} was fulfilled without a resource"))
            }),
            Ok(Err(_)) => Err(PoolError::internal(format!(
                "request {id} was dropped unanswered"
            ))),
            Err(_) => {
                let error = PoolError::timed_out("acquire", timeout);
                inner.update(|core, batch| inner.abort(core, &id, error.clone(), batch));
                // Fulfilment may have won the race.
                match receiver.await {
                    Ok(Ok(Some(lease))) => Ok(lease),
                    _ => Err(error),
                }
            }
        }
    }

    /// Return a resource to the pool.
    ///
    /// Leases from another pool are dropped, which returns them to the
    /// pool they came from.
    pub fn release(&self, lease: Lease<F::Resource>) {
        if lease.pool() != self.inner.id {
            return;
        }
        let (_, slot, resource) = lease.into_parts();
        self.inner.restore(slot, resource, false);
    }

    /// Destroy a resource instead of returning it to the pool. Destroying
    /// the same slot twice is harmless.
    pub fn destroy(&self, lease: Lease<F::Resource>) {
        if lease.pool() != self.inner.id {
            return;
        }
        let (_, slot, resource) = lease.into_parts();
        self.inner.restore(slot, resource, true);
    }

    /// Acquire a resource, run `f` on it and release it, even if `f`
    /// panics or the returned future is dropped.
    pub async fn with<T>(&self, f: impl AsyncFnOnce(&mut F::Resource) -> T) -> PoolResult<T> {
        let mut lease = self.acquire().await?;
        let output = f(&mut *lease).await;
        self.release(lease);
        Ok(output)
    }

    /// Current pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let core = self.inner.core.lock();
        let repository = &core.repository;
        let idle = repository.count(SlotState::Idle);
        let size = repository.size();
        PoolStats {
            queued: core.queue.queued(),
            acquiring: core.queue.dispatched(),
            idle,
            acquired: repository.count(SlotState::Acquired),
            reinstating: repository.count(SlotState::Reinstating),
            doomed: repository.count(SlotState::Doomed),
            timedout: repository.count(SlotState::TimedOut),
            zombie: repository.count(SlotState::Zombie),
            size,
            available: idle + self.inner.config.max_size.saturating_sub(size),
            peak: repository.peak(),
        }
    }

    async fn ensure_started(&self) -> PoolResult<()> {
        loop {
            let wait = {
                let core = self.inner.core.lock();
                match core.phase {
                    PoolState::Started => return Ok(()),
                    PoolState::NotStarted => None,
                    PoolState::Starting => Some(self.inner.starting.block()),
                    phase => return Err(phase.not_running()),
                }
            };
            match wait {
                None => match self.start().await {
                    Ok(()) | Err(PoolError::AlreadyStarted) => return Ok(()),
                    Err(err) => return Err(err),
                },
                Some(wait) => {
                    if let Some(Err(err)) = wait.await {
                        return Err(err);
                    }
                }
            }
        }
    }
}

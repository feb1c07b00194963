//! One caller's wait for a resource.

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::{PoolError, PoolResult};
use crate::slot::SlotId;

/// Unique identifier of an acquire request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Created, not yet in the queue.
    Unqueued,
    /// Waiting in the queue.
    Queued,
    /// Paired with a slot.
    Dispatched,
    /// Satisfied. Terminal.
    Fulfilled,
    /// Gave up. Terminal.
    Aborted,
}

impl RequestState {
    /// Lower-case state name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Unqueued => "unqueued",
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Fulfilled => "fulfilled",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a request was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// A caller wants a resource.
    Acquire,
    /// `start()` wants an idle resource provisioned. Not bound by the
    /// queue limit and never handed a resource.
    Initialise,
}

/// Sending half of a request's waiter.
pub type Waiter<T> = oneshot::Sender<PoolResult<T>>;

/// A request for a resource, delivered as `T` through a one-shot waiter.
#[derive(Debug)]
pub struct AcquireRequest<T> {
    id: RequestId,
    state: RequestState,
    purpose: Purpose,
    backoff: Backoff,
    slot: Option<SlotId>,
    waiter: Option<Waiter<T>>,
    created_at: Instant,
}

impl<T> AcquireRequest<T> {
    /// Create an unqueued request and the receiver its result arrives on.
    #[must_use]
    pub fn new(
        id: RequestId,
        purpose: Purpose,
        backoff: BackoffConfig,
    ) -> (Self, oneshot::Receiver<PoolResult<T>>) {
        let (waiter, receiver) = oneshot::channel();
        let request = Self {
            id,
            state: RequestState::Unqueued,
            purpose,
            backoff: Backoff::new(backoff),
            slot: None,
            waiter: Some(waiter),
            created_at: Instant::now(),
        };
        (request, receiver)
    }

    /// The request identifier.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Why the request was made.
    #[must_use]
    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// How many attempts to serve the request have failed.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// The slot currently serving the request.
    #[must_use]
    pub fn slot(&self) -> Option<SlotId> {
        self.slot
    }

    /// Time since the request was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Join the queue.
    pub fn queue(&mut self) -> PoolResult<()> {
        self.expect(RequestState::Unqueued, "queue")?;
        self.state = RequestState::Queued;
        Ok(())
    }

    /// Leave the queue, paired with `slot`. Returns the attempt number,
    /// starting at zero.
    pub fn dispatch(&mut self, slot: SlotId) -> PoolResult<u32> {
        self.expect(RequestState::Queued, "dispatch")?;
        self.state = RequestState::Dispatched;
        self.slot = Some(slot);
        Ok(self.attempts())
    }

    /// Drop the pairing after a failed attempt and return how long to
    /// wait before queueing again.
    pub fn defer(&mut self) -> PoolResult<Duration> {
        self.expect(RequestState::Dispatched, "defer")?;
        self.slot = None;
        Ok(self.backoff.next())
    }

    /// Rejoin the queue after a deferral. Returns `false` if the request
    /// was aborted in the meantime.
    pub fn requeue(&mut self) -> PoolResult<bool> {
        match self.state {
            RequestState::Aborted => Ok(false),
            RequestState::Dispatched => {
                self.state = RequestState::Queued;
                Ok(true)
            }
            _ => Err(self.invalid("requeue")),
        }
    }

    /// Complete the request, handing out its waiter.
    pub fn dequeue(&mut self) -> PoolResult<Waiter<T>> {
        self.expect(RequestState::Dispatched, "dequeue")?;
        let waiter = self
            .waiter
            .take()
            .ok_or_else(|| PoolError::internal(format!("request {} has no waiter", self.id)))?;
        self.state = RequestState::Fulfilled;
        Ok(waiter)
    }

    /// Give up, telling the waiter why. Returns the slot that was serving
    /// the request, if any. A settled request is left alone.
    pub fn abort(&mut self, reason: PoolError) -> Option<SlotId> {
        if matches!(self.state, RequestState::Fulfilled | RequestState::Aborted) {
            return None;
        }
        self.state = RequestState::Aborted;
        if let Some(waiter) = self.waiter.take() {
            // The caller may have stopped listening.
            let _ = waiter.send(Err(reason));
        }
        self.slot.take()
    }

    fn expect(&self, state: RequestState, operation: &'static str) -> PoolResult<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> PoolError {
        PoolError::InvalidRequestTransition {
            request: self.id.to_string(),
            state: self.state.name(),
            operation,
        }
    }
}

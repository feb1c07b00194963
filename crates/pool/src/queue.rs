//! FIFO of acquire requests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;

use crate::error::{PoolError, PoolResult};
use crate::latch::Latch;
use crate::request::{AcquireRequest, Purpose, RequestId, RequestState, Waiter};
use crate::slot::SlotId;

/// A request that just left the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// The request.
    pub request: RequestId,
    /// Why it was made.
    pub purpose: Purpose,
    /// The slot serving it.
    pub slot: SlotId,
    /// Failed attempts so far.
    pub attempt: u32,
}

/// Requests waiting for, or being served, a slot.
///
/// Requests are dispatched strictly in arrival order. A request that is
/// requeued after a failed attempt goes back to the head, ahead of
/// everything that arrived after it.
#[derive(Debug)]
pub struct RequestQueue<T> {
    max_queued: usize,
    requests: HashMap<RequestId, AcquireRequest<T>>,
    queued: VecDeque<RequestId>,
    dispatched: HashSet<RequestId>,
    drained: Latch,
}

impl<T> RequestQueue<T> {
    /// Create a queue holding at most `max_queued` waiting acquire
    /// requests.
    #[must_use]
    pub fn new(max_queued: usize) -> Self {
        Self {
            max_queued,
            requests: HashMap::new(),
            queued: VecDeque::new(),
            dispatched: HashSet::new(),
            drained: Latch::new(),
        }
    }

    /// Number of requests waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Number of requests paired with a slot or backing off.
    #[must_use]
    pub fn dispatched(&self) -> usize {
        self.dispatched.len()
    }

    /// Whether the queue tracks `request`.
    #[must_use]
    pub fn contains(&self, request: &RequestId) -> bool {
        self.requests.contains_key(request)
    }

    /// Look up a tracked request.
    #[must_use]
    pub fn get(&self, request: &RequestId) -> Option<&AcquireRequest<T>> {
        self.requests.get(request)
    }

    /// Ids of every tracked request with the given purpose.
    #[must_use]
    pub fn ids(&self, purpose: Purpose) -> Vec<RequestId> {
        self.requests
            .values()
            .filter(|request| request.purpose() == purpose)
            .map(|request| request.id().clone())
            .collect()
    }

    /// Append a request.
    ///
    /// # Errors
    ///
    /// `MaxQueueSizeExceeded` if the queue is full. Initialise requests
    /// are never rejected.
    pub fn add(&mut self, mut request: AcquireRequest<T>) -> PoolResult<()> {
        if request.purpose() == Purpose::Acquire && self.queued.len() >= self.max_queued {
            return Err(PoolError::MaxQueueSizeExceeded {
                max_queue_size: self.max_queued,
            });
        }
        if self.requests.contains_key(request.id()) {
            return Err(PoolError::internal(format!(
                "request {} is already queued",
                request.id()
            )));
        }
        request.queue()?;
        self.queued.push_back(request.id().clone());
        self.requests.insert(request.id().clone(), request);
        Ok(())
    }

    /// Dispatch the head of the queue to the slot `reserve` picks for it.
    ///
    /// Returns `None`, leaving the queue untouched, if the queue is empty
    /// or `reserve` finds no slot.
    pub fn check<F>(&mut self, reserve: F) -> PoolResult<Option<Dispatch>>
    where
        F: FnOnce(&RequestId) -> Option<SlotId>,
    {
        let Some(head) = self.queued.front() else {
            return Ok(None);
        };
        let Some(slot) = reserve(head) else {
            return Ok(None);
        };
        let Some(id) = self.queued.pop_front() else {
            return Ok(None);
        };
        let request = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| PoolError::internal(format!("queued request {id} is untracked")))?;
        let attempt = request.dispatch(slot)?;
        let purpose = request.purpose();
        self.dispatched.insert(id.clone());
        self.release_drain();
        Ok(Some(Dispatch {
            request: id,
            purpose,
            slot,
            attempt,
        }))
    }

    /// Back off a dispatched request after a failed attempt.
    pub fn defer(&mut self, request: &RequestId) -> PoolResult<Duration> {
        self.request_mut(request)?.defer()
    }

    /// Put a deferred request back at the head of the queue. Returns
    /// `false` if it was aborted while backing off.
    pub fn requeue(&mut self, request: &RequestId) -> PoolResult<bool> {
        let Some(entry) = self.requests.get_mut(request) else {
            return Ok(false);
        };
        if !entry.requeue()? {
            return Ok(false);
        }
        self.dispatched.remove(request);
        self.queued.push_front(request.clone());
        Ok(true)
    }

    /// Complete a dispatched request. Returns its waiter and age.
    pub fn fulfil(&mut self, request: &RequestId) -> PoolResult<(Waiter<T>, Duration)> {
        let entry = self.request_mut(request)?;
        let waiter = entry.dequeue()?;
        let age = entry.age();
        self.forget(request);
        Ok((waiter, age))
    }

    /// Abort a request, telling its waiter why. Returns the slot that was
    /// serving it. Unknown requests are ignored.
    pub fn abort(&mut self, request: &RequestId, reason: PoolError) -> Option<SlotId> {
        let slot = self.requests.get_mut(request)?.abort(reason);
        self.forget(request);
        slot
    }

    /// Abort every request. Returns the slots that were serving them.
    pub fn abort_all(&mut self, reason: &PoolError) -> Vec<(RequestId, Option<SlotId>)> {
        let ids: Vec<RequestId> = self.requests.keys().cloned().collect();
        ids.into_iter()
            .map(|id| {
                let slot = self.abort(&id, reason.clone());
                (id, slot)
            })
            .collect()
    }

    /// Resolves once no request is waiting for a slot.
    pub fn drain(&self) -> impl Future<Output = ()> + Send + use<T> {
        let wait = if self.queued.is_empty() {
            None
        } else {
            self.drained.activate();
            Some(self.drained.block())
        };
        async move {
            if let Some(wait) = wait {
                wait.await;
            }
        }
    }

    fn request_mut(&mut self, request: &RequestId) -> PoolResult<&mut AcquireRequest<T>> {
        self.requests
            .get_mut(request)
            .ok_or_else(|| PoolError::internal(format!("unknown request {request}")))
    }

    fn forget(&mut self, request: &RequestId) {
        if let Some(entry) = self.requests.remove(request) {
            if entry.state() != RequestState::Dispatched {
                self.queued.retain(|id| id != request);
            }
        }
        self.dispatched.remove(request);
        self.release_drain();
    }

    fn release_drain(&self) {
        if self.queued.is_empty() && self.drained.is_active() {
            self.drained.release(());
        }
    }
}

//! Carries out slot effects: runs factory calls, settles requests and
//! keeps the queue moving.
//!
//! Everything here runs under the core lock except the spawned tasks,
//! which take the lock again only to report back.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Core, PoolState, Shared};
use crate::command::{Command, CommandKind, Completion, Outcome, Verdict};
use crate::config::ResetPolicy;
use crate::error::{PoolError, PoolResult};
use crate::events::Event;
use crate::factory::Factory;
use crate::lease::Lease;
use crate::request::{AcquireRequest, Purpose, RequestId};
use crate::slot::{Effect, Input, SlotId, SlotState};

/// Follow-up work collected while the core lock is held.
pub(super) struct Batch<R> {
    /// Capacity changed; check the queue and replenish before unlocking.
    pub(super) advance: bool,
    /// Leases nobody is waiting for. They return themselves to the pool
    /// when dropped, so they must outlive the lock.
    orphans: Vec<Lease<R>>,
}

impl<R> Default for Batch<R> {
    fn default() -> Self {
        Self {
            advance: false,
            orphans: Vec::new(),
        }
    }
}

impl<F: Factory> Shared<F> {
    /// Run `f` under the core lock, then settle the knock-on effects.
    pub(super) fn update<T>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut Core<F>, &mut Batch<F::Resource>) -> T,
    ) -> T {
        let mut batch = Batch::default();
        let output = {
            let mut core = self.core.lock();
            let output = f(&mut *core, &mut batch);
            self.finish(&mut *core, &mut batch);
            output
        };
        drop(batch);
        output
    }

    fn finish(self: &Arc<Self>, core: &mut Core<F>, batch: &mut Batch<F::Resource>) {
        while std::mem::take(&mut batch.advance) {
            if core.culling {
                for slot in core.repository.cull() {
                    self.apply(core, slot, Input::Destroy, batch);
                }
            } else if matches!(
                core.phase,
                PoolState::Starting | PoolState::Started | PoolState::Stopping
            ) {
                self.check_queue(core, batch);
                if core.phase == PoolState::Started {
                    self.replenish(core, batch);
                }
            }
        }
        if core.culling && core.drained.is_active() && core.repository.is_drained() {
            core.drained.release(());
        }
    }

    /// Feed `input` to a slot and carry out every effect it produces.
    pub(super) fn apply(
        self: &Arc<Self>,
        core: &mut Core<F>,
        slot: SlotId,
        input: Input<F::Resource>,
        batch: &mut Batch<F::Resource>,
    ) {
        let mut inputs = VecDeque::from([(slot, input)]);
        while let Some((slot, input)) = inputs.pop_front() {
            let effects = match core.repository.transition(slot, input) {
                Ok(effects) => effects,
                Err(err) => {
                    self.report(&err);
                    continue;
                }
            };
            for effect in effects {
                match effect {
                    Effect::Run {
                        kind,
                        payload,
                        abort,
                    } => self.spawn_command(slot, kind, payload, abort),
                    Effect::Notify(event) => {
                        batch.advance |= event.frees_capacity();
                        self.events.emit(event);
                    }
                    Effect::Advance => batch.advance = true,
                    Effect::Ready { request } => {
                        match core.queue.get(&request).map(AcquireRequest::purpose) {
                            Some(Purpose::Acquire) => inputs.push_back((slot, Input::Acquire)),
                            Some(Purpose::Initialise) => {
                                self.fulfil(core, &request, None, batch);
                                inputs.push_back((slot, Input::Unreserve));
                            }
                            None => inputs.push_back((slot, Input::Unreserve)),
                        }
                    }
                    Effect::Deliver { request, resource } => {
                        let lease = self.lease(slot, resource);
                        self.fulfil(core, &request, Some(lease), batch);
                    }
                    Effect::Failed { request, cause } => self.retry(core, &request, cause),
                    Effect::Expired { request, error } => {
                        match core.queue.get(&request).map(AcquireRequest::purpose) {
                            Some(Purpose::Acquire) => self.abort(core, &request, error, batch),
                            Some(Purpose::Initialise) => self.retry(core, &request, error),
                            None => {}
                        }
                    }
                }
            }
        }
    }

    /// Abort a request and abandon the slot serving it.
    pub(super) fn abort(
        self: &Arc<Self>,
        core: &mut Core<F>,
        request: &RequestId,
        reason: PoolError,
        batch: &mut Batch<F::Resource>,
    ) {
        if !core.queue.contains(request) {
            return;
        }
        tracing::debug!(pool = %self.id, %request, %reason, "aborting request");
        let slot = core.queue.abort(request, reason.clone());
        self.events.emit(Event::RequestAborted {
            request: request.clone(),
            reason,
        });
        if let Some(slot) = slot {
            self.apply(core, slot, Input::Abandon, batch);
        }
    }

    /// Hand a resource back from a dropped, released or destroyed lease.
    pub(super) fn restore(self: &Arc<Self>, slot: SlotId, resource: F::Resource, discard: bool) {
        self.update(|core, batch| {
            if core.repository.locate(slot).is_none() {
                self.report(&PoolError::UnknownSlot { slot });
                return;
            }
            let input = if discard || core.culling {
                Input::Discard(resource)
            } else {
                Input::Release {
                    resource,
                    reset: self.config.reset == ResetPolicy::Always,
                }
            };
            self.apply(core, slot, input, batch);
        });
    }

    /// Wait for queued callers to be served, abort the rest, then destroy
    /// resources until only timed out and zombie slots remain.
    pub(super) async fn shutdown(self: &Arc<Self>, deadline: Instant) -> PoolResult<()> {
        let drain = self.core.lock().queue.drain();
        let queue_drained = tokio::time::timeout_at(deadline, drain).await.is_ok();

        let reason = PoolState::Stopping.not_running();
        self.update(|core, batch| {
            for (request, slot) in core.queue.abort_all(&reason) {
                self.events.emit(Event::RequestAborted {
                    request,
                    reason: reason.clone(),
                });
                if let Some(slot) = slot {
                    self.apply(core, slot, Input::Abandon, batch);
                }
            }
            core.culling = true;
            batch.advance = true;
        });

        let wait = self.update(|core, _| {
            if core.repository.is_drained() {
                None
            } else {
                core.drained.activate();
                Some(core.drained.block())
            }
        });
        let slots_drained = match wait {
            Some(wait) => tokio::time::timeout_at(deadline, wait).await.is_ok(),
            None => true,
        };

        if queue_drained && slots_drained {
            Ok(())
        } else {
            Err(PoolError::timed_out("stop", self.config.stop_timeout))
        }
    }

    /// Log and publish a broken invariant.
    pub(super) fn report(&self, error: &PoolError) {
        tracing::error!(pool = %self.id, %error, "pool invariant violated");
        self.events.emit(Event::PoolError {
            error: error.clone(),
        });
    }

    fn check_queue(self: &Arc<Self>, core: &mut Core<F>, batch: &mut Batch<F::Resource>) {
        loop {
            let Core {
                queue, repository, ..
            } = &mut *core;
            let dispatch = match queue.check(|_| repository.reserve()) {
                Ok(Some(dispatch)) => dispatch,
                Ok(None) => break,
                Err(err) => {
                    self.report(&err);
                    break;
                }
            };
            self.events.emit(Event::RequestDispatched {
                request: dispatch.request.clone(),
                slot: dispatch.slot,
                attempt: dispatch.attempt,
            });
            self.apply(core, dispatch.slot, Input::Reserve(dispatch.request), batch);
        }
    }

    fn replenish(self: &Arc<Self>, core: &mut Core<F>, batch: &mut Batch<F::Resource>) {
        if core.holdoff.is_some_and(|until| Instant::now() < until) {
            return;
        }
        core.holdoff = None;
        while core.repository.deficit() > 0 && core.repository.can_extend() {
            let slot = core.repository.extend();
            tracing::debug!(pool = %self.id, %slot, "replenishing");
            self.apply(core, slot, Input::Provision, batch);
        }
    }

    fn fulfil(
        self: &Arc<Self>,
        core: &mut Core<F>,
        request: &RequestId,
        lease: Option<Lease<F::Resource>>,
        batch: &mut Batch<F::Resource>,
    ) {
        match core.queue.fulfil(request) {
            Ok((waiter, duration)) => {
                self.events.emit(Event::RequestFulfilled {
                    request: request.clone(),
                    duration,
                });
                if let Err(Ok(Some(lease))) = waiter.send(Ok(lease)) {
                    tracing::debug!(pool = %self.id, %request, "caller went away, releasing");
                    batch.orphans.push(lease);
                }
            }
            Err(err) => {
                self.report(&err);
                batch.orphans.extend(lease);
            }
        }
    }

    fn retry(self: &Arc<Self>, core: &mut Core<F>, request: &RequestId, cause: PoolError) {
        if !core.queue.contains(request) {
            return;
        }
        let delay = match core.queue.defer(request) {
            Ok(delay) => delay,
            Err(err) => return self.report(&err),
        };
        tracing::debug!(pool = %self.id, %request, ?delay, %cause, "requeueing request");
        self.events.emit(Event::RequestRequeued {
            request: request.clone(),
            delay,
            cause,
        });

        let pool = Arc::downgrade(self);
        let request = request.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(pool) = pool.upgrade() {
                pool.update(|core, batch| match core.queue.requeue(&request) {
                    Ok(requeued) => batch.advance |= requeued,
                    Err(err) => pool.report(&err),
                });
            }
        });
    }

    fn hold_off(self: &Arc<Self>, core: &mut Core<F>) {
        let delay = core.replenish.next();
        core.holdoff = Some(Instant::now() + delay);
        tracing::debug!(pool = %self.id, ?delay, "replenishment backing off");

        let pool = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(pool) = pool.upgrade() {
                pool.update(|_, batch| batch.advance = true);
            }
        });
    }

    fn lease(self: &Arc<Self>, slot: SlotId, resource: F::Resource) -> Lease<F::Resource> {
        let pool = Arc::downgrade(self);
        Lease::new(self.id, slot, resource, move |slot, resource| {
            if let Some(pool) = pool.upgrade() {
                pool.restore(slot, resource, false);
            }
        })
    }

    fn spawn_command(
        self: &Arc<Self>,
        slot: SlotId,
        kind: CommandKind,
        payload: Option<F::Resource>,
        abort: CancellationToken,
    ) {
        let timeout = match kind {
            CommandKind::Create => self.config.create_timeout,
            CommandKind::Validate => self.config.validate_timeout,
            CommandKind::Reset => self.config.reset_timeout,
            CommandKind::Destroy => self.config.destroy_timeout,
        };
        let serial = kind.is_serialised().then(|| match kind {
            CommandKind::Destroy => Arc::clone(&self.destroying),
            _ => Arc::clone(&self.creating),
        });
        let command = Command::new(kind, Arc::clone(&self.factory), timeout, abort, serial);
        let pool = Arc::clone(self);

        tokio::spawn(async move {
            let outcome = match command.execute(payload).await {
                Ok(outcome) => outcome,
                Err(err) => return pool.report(&err),
            };
            let verdict = outcome.verdict();
            match outcome {
                Outcome::OnTime {
                    completion,
                    elapsed,
                } => {
                    tracing::debug!(pool = %pool.id, %slot, %kind, ?verdict, ?elapsed, "command settled");
                    pool.settle(slot, completion, elapsed);
                }
                Outcome::TimedOut(belated) => {
                    tracing::warn!(pool = %pool.id, %slot, %kind, ?timeout, "command timed out");
                    pool.update(|core, batch| {
                        pool.apply(core, slot, Input::Expire { kind, after: timeout }, batch);
                    });
                    let (completion, elapsed) = belated.settle().await;
                    let verdict = Verdict::belated(false, completion.is_success());
                    tracing::info!(pool = %pool.id, %slot, %kind, %verdict, ?elapsed, "late command settled");
                    pool.settle(slot, completion, elapsed);
                }
                Outcome::Aborted(belated) => {
                    let (completion, elapsed) = belated.settle().await;
                    let verdict = Verdict::belated(true, completion.is_success());
                    tracing::debug!(pool = %pool.id, %slot, %kind, %verdict, ?elapsed, "aborted command settled");
                    pool.settle(slot, completion, elapsed);
                }
                Outcome::Skipped => {
                    tracing::debug!(pool = %pool.id, %slot, %kind, "aborted before the factory was called");
                    pool.update(|core, batch| pool.apply(core, slot, Input::Skip(kind), batch));
                }
            }
        });
    }

    fn settle(self: &Arc<Self>, slot: SlotId, completion: Completion<F::Resource>, elapsed: Duration) {
        let kind = completion.kind();
        let success = completion.is_success();
        self.update(|core, batch| {
            let provisioning = matches!(kind, CommandKind::Create | CommandKind::Validate)
                && core.repository.get(slot).is_some_and(|entry| {
                    matches!(entry.state(), SlotState::Pending | SlotState::Ready)
                        && entry.lease().is_none()
                });
            self.apply(core, slot, Input::Settle { completion, elapsed }, batch);
            if provisioning {
                if success {
                    core.replenish.reset();
                } else {
                    self.hold_off(core);
                }
            }
        });
    }
}

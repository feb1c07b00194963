//! Per-resource state machine.
//!
//! A [`Slot`] tracks one resource through its lifecycle. It never performs
//! I/O: [`Slot::transition`] consumes an [`Input`], updates the slot and
//! returns the [`Effect`]s the pool must carry out (factory calls to run,
//! events to publish, requests to settle).
//!
//! On-time and late factory results drive the same transition, keyed on
//! the slot's current state. A create that settles after its slot was
//! segregated is therefore destroyed, never adopted.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::command::{CommandKind, Completion};
use crate::config::ValidatePolicy;
use crate::error::{PoolError, PoolResult};
use crate::events::Event;
use crate::request::RequestId;

/// Stable identifier of a slot within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(u64);

impl SlotId {
    /// Wrap a raw slot number.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotState {
    /// No resource yet, nothing in flight.
    Empty,
    /// `create` in flight.
    Pending,
    /// Resource created, `validate` in flight.
    Ready,
    /// Resource available.
    Idle,
    /// Resource handed to a caller.
    Acquired,
    /// Released resource being reset.
    Reinstating,
    /// `destroy` in flight.
    Doomed,
    /// A factory call outlived its timeout or was abandoned.
    TimedOut,
    /// Resource destroyed. Terminal.
    Destroyed,
    /// `destroy` failed. Terminal, never reclaimed.
    Zombie,
}

impl SlotState {
    /// Every state, in partition order.
    pub const ALL: [Self; 10] = [
        Self::Empty,
        Self::Pending,
        Self::Ready,
        Self::Idle,
        Self::Acquired,
        Self::Reinstating,
        Self::Doomed,
        Self::TimedOut,
        Self::Destroyed,
        Self::Zombie,
    ];

    /// Lower-case state name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Idle => "idle",
            Self::Acquired => "acquired",
            Self::Reinstating => "reinstating",
            Self::Doomed => "doomed",
            Self::TimedOut => "timedout",
            Self::Destroyed => "destroyed",
            Self::Zombie => "zombie",
        }
    }

    /// Whether no further factory calls will ever run for this slot.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Zombie)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something that happened to a slot.
#[derive(Debug)]
pub enum Input<R> {
    /// Create a resource without a request waiting on it.
    Provision,
    /// Lease the slot to a request and start readying it.
    Reserve(RequestId),
    /// Drop the lease of an idle slot.
    Unreserve,
    /// Hand the idle resource to the leasing request.
    Acquire,
    /// A caller returned the resource.
    Release {
        /// The returned resource.
        resource: R,
        /// Whether to reset it before it becomes idle again.
        reset: bool,
    },
    /// A caller returned the resource for destruction.
    Discard(R),
    /// Destroy the resource, or abandon whatever is in flight.
    Destroy,
    /// Abort the in-flight call and take the slot out of rotation.
    Abandon,
    /// The in-flight call exceeded its time limit.
    Expire {
        /// The call that timed out.
        kind: CommandKind,
        /// The configured limit.
        after: Duration,
    },
    /// The in-flight call was aborted before the factory saw it.
    Skip(CommandKind),
    /// The in-flight call settled, on time or late.
    Settle {
        /// The call's result.
        completion: Completion<R>,
        /// How long the call ran.
        elapsed: Duration,
    },
}

impl<R> Input<R> {
    fn name(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Reserve(_) => "reserve",
            Self::Unreserve => "unreserve",
            Self::Acquire => "acquire",
            Self::Release { .. } => "release",
            Self::Discard(_) => "discard",
            Self::Destroy => "destroy",
            Self::Abandon => "abandon",
            Self::Expire { .. } => "expire",
            Self::Skip(_) => "skip",
            Self::Settle { .. } => "settle",
        }
    }
}

/// Work the pool must do after a transition.
#[derive(Debug)]
pub enum Effect<R> {
    /// Run a factory call. `payload` is moved into the call.
    Run {
        /// The factory call.
        kind: CommandKind,
        /// The resource the call operates on.
        payload: Option<R>,
        /// Aborts the call's race.
        abort: CancellationToken,
    },
    /// Publish an event.
    Notify(Event),
    /// Capacity changed; check the queue and replenish.
    Advance,
    /// The leasing request can take the idle resource.
    Ready {
        /// The leasing request.
        request: RequestId,
    },
    /// Hand a resource to a request.
    Deliver {
        /// The receiving request.
        request: RequestId,
        /// The resource.
        resource: R,
    },
    /// The attempt to serve the request failed and may be retried.
    Failed {
        /// The request.
        request: RequestId,
        /// Why the attempt failed.
        cause: PoolError,
    },
    /// The attempt to serve the request timed out.
    Expired {
        /// The request.
        request: RequestId,
        /// The timeout.
        error: PoolError,
    },
}

#[derive(Debug)]
struct InFlight {
    kind: CommandKind,
    abort: CancellationToken,
}

/// One resource and its lifecycle.
#[derive(Debug)]
pub struct Slot<R> {
    id: SlotId,
    state: SlotState,
    policy: ValidatePolicy,
    resource: Option<R>,
    lease: Option<RequestId>,
    in_flight: Option<InFlight>,
}

impl<R> Slot<R> {
    /// Create an empty slot.
    #[must_use]
    pub fn new(id: SlotId, policy: ValidatePolicy) -> Self {
        Self {
            id,
            state: SlotState::Empty,
            policy,
            resource: None,
            lease: None,
            in_flight: None,
        }
    }

    /// The slot identifier.
    #[must_use]
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// The request this slot is leased to.
    #[must_use]
    pub fn lease(&self) -> Option<&RequestId> {
        self.lease.as_ref()
    }

    /// Whether the slot is leased to `request`.
    #[must_use]
    pub fn contains(&self, request: &RequestId) -> bool {
        self.lease.as_ref() == Some(request)
    }

    /// Whether the slot holds a resource right now. Resources held by an
    /// in-flight call or a caller don't count.
    #[must_use]
    pub fn has_resource(&self) -> bool {
        self.resource.is_some()
    }

    /// Apply `input`.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidTransition` if the current state doesn't accept
    /// the input. The slot is left unchanged.
    pub fn transition(&mut self, input: Input<R>) -> PoolResult<Vec<Effect<R>>> {
        use SlotState::{
            Acquired, Destroyed, Doomed, Empty, Idle, Pending, Ready, Reinstating, TimedOut,
            Zombie,
        };

        let mut effects = Vec::new();
        match (self.state, input) {
            (Empty, Input::Provision) => self.run(CommandKind::Create, None, Pending, &mut effects),
            (Empty, Input::Reserve(request)) => {
                self.lease = Some(request);
                self.run(CommandKind::Create, None, Pending, &mut effects);
            }
            (Empty, Input::Destroy | Input::Abandon) => self.state = Destroyed,
            (Pending | Ready | Idle, Input::Provision) => {}

            (Idle, Input::Reserve(request)) if self.lease.is_none() => {
                if self.policy.validates_idle() {
                    let resource = self.take_resource("reserve")?;
                    self.lease = Some(request);
                    self.run(CommandKind::Validate, Some(resource), Ready, &mut effects);
                } else {
                    self.lease = Some(request.clone());
                    effects.push(Effect::Ready { request });
                }
            }
            (Idle, Input::Unreserve | Input::Abandon) => {
                if self.lease.take().is_some() {
                    effects.push(Effect::Advance);
                }
            }
            (Idle, Input::Acquire) if self.lease.is_some() && self.resource.is_some() => {
                let resource = self.take_resource("acquire")?;
                let request = self.lease.clone().ok_or_else(|| self.invalid("acquire"))?;
                self.state = Acquired;
                effects.push(self.notify(Event::ResourceAcquired {
                    slot: self.id,
                    request: request.clone(),
                }));
                effects.push(Effect::Deliver { request, resource });
            }
            (Idle, Input::Destroy) => {
                let resource = self.take_resource("destroy")?;
                self.lease = None;
                self.run(CommandKind::Destroy, Some(resource), Doomed, &mut effects);
            }

            (Acquired, Input::Release { resource, reset }) => {
                self.lease = None;
                effects.push(self.notify(Event::ResourceReleased { slot: self.id }));
                if reset {
                    self.run(CommandKind::Reset, Some(resource), Reinstating, &mut effects);
                } else {
                    self.resource = Some(resource);
                    self.state = Idle;
                    effects.push(Effect::Advance);
                }
            }
            (Acquired, Input::Discard(resource)) => {
                self.lease = None;
                self.run(CommandKind::Destroy, Some(resource), Doomed, &mut effects);
            }

            (Pending | Ready | Reinstating, Input::Destroy | Input::Abandon) => {
                self.abandon(&mut effects);
            }
            (Doomed | TimedOut | Destroyed | Zombie, Input::Destroy | Input::Abandon) => {}

            (Pending | Ready | Reinstating, Input::Expire { kind, after }) => {
                effects.push(self.notify(Event::CommandTimedOut {
                    slot: self.id,
                    kind,
                    duration: after,
                }));
                self.segregate(&mut effects);
                if let Some(request) = self.lease.take() {
                    effects.push(Effect::Expired {
                        request,
                        error: PoolError::timed_out(kind.name(), after),
                    });
                }
            }
            (Doomed, Input::Expire { kind, after }) => {
                effects.push(self.notify(Event::CommandTimedOut {
                    slot: self.id,
                    kind,
                    duration: after,
                }));
                self.segregate(&mut effects);
            }
            // Abandoned before its timer fired.
            (TimedOut, Input::Expire { .. }) => {}

            // Only an abandoned create can be skipped; nothing was made.
            (TimedOut, Input::Skip(CommandKind::Create))
                if self.in_flight.as_ref().is_some_and(|flight| flight.kind == CommandKind::Create) =>
            {
                self.in_flight = None;
                self.state = Destroyed;
                effects.push(Effect::Advance);
            }

            (Pending | Ready | Reinstating | Doomed | TimedOut, Input::Settle { completion, elapsed }) => {
                self.settle(completion, elapsed, &mut effects)?;
            }

            (_, input) => return Err(self.invalid(input.name())),
        }
        Ok(effects)
    }

    fn settle(
        &mut self,
        completion: Completion<R>,
        elapsed: Duration,
        effects: &mut Vec<Effect<R>>,
    ) -> PoolResult<()> {
        use SlotState::{Destroyed, Doomed, Pending, Ready, Reinstating, TimedOut, Zombie};

        let kind = completion.kind();
        if self.in_flight.as_ref().is_some_and(|flight| flight.kind == kind) {
            self.in_flight = None;
        }
        let event = match completion.error() {
            None => Event::CommandSucceeded {
                slot: self.id,
                kind,
                duration: elapsed,
            },
            Some(cause) => Event::CommandFailed {
                slot: self.id,
                kind,
                duration: elapsed,
                cause: Arc::clone(cause),
            },
        };

        match (self.state, completion) {
            (Pending, Completion::Created(Ok(resource))) => {
                effects.push(self.notify(event));
                if self.policy.validates_new() {
                    self.run(CommandKind::Validate, Some(resource), Ready, effects);
                } else {
                    self.resource = Some(resource);
                    self.become_idle(effects);
                }
            }
            (Pending, Completion::Created(Err(cause))) => {
                effects.push(self.notify(event));
                self.state = Destroyed;
                self.fail(kind.failure(cause), effects);
                effects.push(Effect::Advance);
            }
            (Ready, Completion::Validated(resource, Ok(())))
            | (Reinstating, Completion::Reset(resource, Ok(()))) => {
                effects.push(self.notify(event));
                self.resource = Some(resource);
                self.become_idle(effects);
            }
            (Ready, Completion::Validated(resource, Err(cause)))
            | (Reinstating, Completion::Reset(resource, Err(cause))) => {
                effects.push(self.notify(event));
                self.fail(kind.failure(cause), effects);
                self.run(CommandKind::Destroy, Some(resource), Doomed, effects);
            }
            (Doomed | TimedOut, Completion::Destroyed(result)) => {
                effects.push(self.notify(event));
                self.state = if result.is_ok() { Destroyed } else { Zombie };
            }
            (
                TimedOut,
                Completion::Created(Ok(resource))
                | Completion::Validated(resource, _)
                | Completion::Reset(resource, _),
            ) => {
                effects.push(self.notify(event));
                self.run(CommandKind::Destroy, Some(resource), Doomed, effects);
            }
            (TimedOut, Completion::Created(Err(_))) => {
                effects.push(self.notify(event));
                self.state = Destroyed;
                effects.push(Effect::Advance);
            }
            (_, Completion::Lost(kind, cause)) => {
                effects.push(self.notify(event));
                self.state = Zombie;
                self.fail(kind.failure(cause), effects);
            }
            (_, completion) => {
                return Err(self.invalid(match completion.kind() {
                    CommandKind::Create => "settle create",
                    CommandKind::Validate => "settle validate",
                    CommandKind::Reset => "settle reset",
                    CommandKind::Destroy => "settle destroy",
                }));
            }
        }
        Ok(())
    }

    fn run(
        &mut self,
        kind: CommandKind,
        payload: Option<R>,
        next: SlotState,
        effects: &mut Vec<Effect<R>>,
    ) {
        let abort = CancellationToken::new();
        self.in_flight = Some(InFlight {
            kind,
            abort: abort.clone(),
        });
        self.state = next;
        effects.push(Effect::Run {
            kind,
            payload,
            abort,
        });
    }

    fn become_idle(&mut self, effects: &mut Vec<Effect<R>>) {
        self.state = SlotState::Idle;
        match &self.lease {
            Some(request) => effects.push(Effect::Ready {
                request: request.clone(),
            }),
            None => effects.push(Effect::Advance),
        }
    }

    fn abandon(&mut self, effects: &mut Vec<Effect<R>>) {
        if let Some(flight) = &self.in_flight {
            flight.abort.cancel();
        }
        self.segregate(effects);
        self.lease = None;
    }

    fn segregate(&mut self, effects: &mut Vec<Effect<R>>) {
        self.state = SlotState::TimedOut;
        effects.push(self.notify(Event::ResourceSegregated { slot: self.id }));
    }

    fn fail(&mut self, cause: PoolError, effects: &mut Vec<Effect<R>>) {
        if let Some(request) = self.lease.take() {
            effects.push(Effect::Failed { request, cause });
        }
    }

    fn take_resource(&mut self, input: &'static str) -> PoolResult<R> {
        self.resource.take().ok_or_else(|| self.invalid(input))
    }

    fn notify(&self, event: Event) -> Effect<R> {
        tracing::debug!(slot = %self.id, state = %self.state, code = event.code(), "slot event");
        Effect::Notify(event)
    }

    fn invalid(&self, input: &'static str) -> PoolError {
        PoolError::InvalidTransition {
            slot: self.id,
            state: self.state,
            input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BoxError, Cause};
    use pretty_assertions::assert_eq;

    fn slot(policy: ValidatePolicy) -> Slot<&'static str> {
        Slot::new(SlotId::new(1), policy)
    }

    fn cause(message: &str) -> Cause {
        Arc::from(BoxError::from(message.to_string()))
    }

    fn settle(
        slot: &mut Slot<&'static str>,
        completion: Completion<&'static str>,
    ) -> Vec<Effect<&'static str>> {
        slot.transition(Input::Settle {
            completion,
            elapsed: Duration::from_millis(1),
        })
        .unwrap()
    }

    fn codes(effects: &[Effect<&'static str>]) -> Vec<&'static str> {
        effects
            .iter()
            .map(|effect| match effect {
                Effect::Run { kind, .. } => kind.name(),
                Effect::Notify(event) => event.code(),
                Effect::Advance => "advance",
                Effect::Ready { .. } => "ready",
                Effect::Deliver { .. } => "deliver",
                Effect::Failed { .. } => "failed",
                Effect::Expired { .. } => "expired",
            })
            .collect()
    }

    #[test]
    fn reserve_create_validate_acquire() {
        let mut slot = slot(ValidatePolicy::Always);
        let request = RequestId::new();

        let effects = slot.transition(Input::Reserve(request.clone())).unwrap();
        assert_eq!(codes(&effects), vec!["create"]);
        assert_eq!(slot.state(), SlotState::Pending);
        assert!(slot.contains(&request));

        let effects = settle(&mut slot, Completion::Created(Ok("R1")));
        assert_eq!(codes(&effects), vec!["RESOURCE_CREATED", "validate"]);
        assert_eq!(slot.state(), SlotState::Ready);

        let effects = settle(&mut slot, Completion::Validated("R1", Ok(())));
        assert_eq!(codes(&effects), vec!["RESOURCE_VALIDATED", "ready"]);
        assert_eq!(slot.state(), SlotState::Idle);

        let effects = slot.transition(Input::Acquire).unwrap();
        assert_eq!(codes(&effects), vec!["RESOURCE_ACQUIRED", "deliver"]);
        assert_eq!(slot.state(), SlotState::Acquired);
        assert!(!slot.has_resource());
    }

    #[test]
    fn release_returns_to_idle() {
        let mut slot = slot(ValidatePolicy::Never);
        slot.transition(Input::Reserve(RequestId::new())).unwrap();
        settle(&mut slot, Completion::Created(Ok("R1")));
        slot.transition(Input::Acquire).unwrap();

        let effects = slot
            .transition(Input::Release {
                resource: "R1",
                reset: false,
            })
            .unwrap();
        assert_eq!(codes(&effects), vec!["RESOURCE_RELEASED", "advance"]);
        assert_eq!(slot.state(), SlotState::Idle);
        assert!(slot.lease().is_none());
        assert!(slot.has_resource());
    }

    #[test]
    fn release_with_reset_reinstates() {
        let mut slot = slot(ValidatePolicy::Never);
        slot.transition(Input::Reserve(RequestId::new())).unwrap();
        settle(&mut slot, Completion::Created(Ok("R1")));
        slot.transition(Input::Acquire).unwrap();
        slot.transition(Input::Release {
            resource: "R1",
            reset: true,
        })
        .unwrap();
        assert_eq!(slot.state(), SlotState::Reinstating);

        let effects = settle(&mut slot, Completion::Reset("R1", Err(cause("dirty"))));
        assert_eq!(codes(&effects), vec!["RESOURCE_RESET_ERROR", "destroy"]);
        assert_eq!(slot.state(), SlotState::Doomed);
    }

    #[test]
    fn creation_error_fails_the_request() {
        let mut slot = slot(ValidatePolicy::Always);
        let request = RequestId::new();
        slot.transition(Input::Reserve(request.clone())).unwrap();

        let effects = settle(&mut slot, Completion::Created(Err(cause("Oh Noes!"))));
        assert_eq!(
            codes(&effects),
            vec!["RESOURCE_CREATION_ERROR", "failed", "advance"]
        );
        assert_eq!(slot.state(), SlotState::Destroyed);
        assert!(matches!(
            &effects[1],
            Effect::Failed { request: failed, cause: PoolError::CreationFailed { .. } } if *failed == request
        ));
    }

    #[test]
    fn validation_error_dooms_the_resource() {
        let mut slot = slot(ValidatePolicy::Always);
        slot.transition(Input::Reserve(RequestId::new())).unwrap();
        settle(&mut slot, Completion::Created(Ok("R1")));

        let effects = settle(&mut slot, Completion::Validated("R1", Err(cause("stale"))));
        assert_eq!(
            codes(&effects),
            vec!["RESOURCE_VALIDATION_ERROR", "failed", "destroy"]
        );
        assert_eq!(slot.state(), SlotState::Doomed);
    }

    #[test]
    fn creation_timeout_expires_request_and_destroys_late_resource() {
        let mut slot = slot(ValidatePolicy::Always);
        slot.transition(Input::Reserve(RequestId::new())).unwrap();

        let effects = slot
            .transition(Input::Expire {
                kind: CommandKind::Create,
                after: Duration::from_millis(100),
            })
            .unwrap();
        assert_eq!(
            codes(&effects),
            vec!["RESOURCE_CREATION_TIMEOUT", "RESOURCE_SEGREGATED", "expired"]
        );
        assert_eq!(slot.state(), SlotState::TimedOut);
        assert!(slot.lease().is_none());

        let effects = settle(&mut slot, Completion::Created(Ok("late")));
        assert_eq!(codes(&effects), vec!["RESOURCE_CREATED", "destroy"]);
        assert_eq!(slot.state(), SlotState::Doomed);

        let effects = settle(&mut slot, Completion::Destroyed(Ok(())));
        assert_eq!(codes(&effects), vec!["RESOURCE_DESTROYED"]);
        assert_eq!(slot.state(), SlotState::Destroyed);
    }

    #[test]
    fn destroy_timeout_then_failure_is_a_zombie() {
        let mut slot = slot(ValidatePolicy::Never);
        slot.transition(Input::Provision).unwrap();
        settle(&mut slot, Completion::Created(Ok("R1")));
        slot.transition(Input::Destroy).unwrap();
        assert_eq!(slot.state(), SlotState::Doomed);

        let effects = slot
            .transition(Input::Expire {
                kind: CommandKind::Destroy,
                after: Duration::from_millis(100),
            })
            .unwrap();
        assert_eq!(
            codes(&effects),
            vec!["RESOURCE_DESTRUCTION_TIMEOUT", "RESOURCE_SEGREGATED"]
        );
        assert_eq!(slot.state(), SlotState::TimedOut);

        settle(&mut slot, Completion::Destroyed(Err(cause("stuck"))));
        assert_eq!(slot.state(), SlotState::Zombie);
        assert!(slot.state().is_terminal());
    }

    #[test]
    fn abandon_aborts_the_in_flight_call() {
        let mut slot = slot(ValidatePolicy::Always);
        let effects = slot.transition(Input::Reserve(RequestId::new())).unwrap();
        let Some(Effect::Run { abort, .. }) = effects.into_iter().next() else {
            panic!("expected a create");
        };

        let effects = slot.transition(Input::Abandon).unwrap();
        assert_eq!(codes(&effects), vec!["RESOURCE_SEGREGATED"]);
        assert!(abort.is_cancelled());
        assert_eq!(slot.state(), SlotState::TimedOut);
        assert!(slot.lease().is_none());
    }

    #[test]
    fn skipped_create_leaves_nothing_behind() {
        let mut slot = slot(ValidatePolicy::Always);
        slot.transition(Input::Reserve(RequestId::new())).unwrap();
        slot.transition(Input::Abandon).unwrap();

        let effects = slot.transition(Input::Skip(CommandKind::Create)).unwrap();
        assert_eq!(codes(&effects), vec!["advance"]);
        assert_eq!(slot.state(), SlotState::Destroyed);

        let mut idle = Slot::<&'static str>::new(SlotId::new(2), ValidatePolicy::Never);
        idle.transition(Input::Provision).unwrap();
        settle(&mut idle, Completion::Created(Ok("R1")));
        assert!(matches!(
            idle.transition(Input::Skip(CommandKind::Create)),
            Err(PoolError::InvalidTransition { input: "skip", .. })
        ));
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut slot = slot(ValidatePolicy::Never);
        slot.transition(Input::Provision).unwrap();
        settle(&mut slot, Completion::Created(Ok("R1")));

        let effects = slot.transition(Input::Destroy).unwrap();
        assert_eq!(codes(&effects), vec!["destroy"]);
        assert!(slot.transition(Input::Destroy).unwrap().is_empty());
        settle(&mut slot, Completion::Destroyed(Ok(())));
        assert!(slot.transition(Input::Destroy).unwrap().is_empty());
        assert_eq!(slot.state(), SlotState::Destroyed);
    }

    #[test]
    fn idle_reuse_revalidates_by_policy() {
        let mut always = slot(ValidatePolicy::Always);
        always.transition(Input::Provision).unwrap();
        settle(&mut always, Completion::Created(Ok("R1")));
        settle(&mut always, Completion::Validated("R1", Ok(())));
        let effects = always.transition(Input::Reserve(RequestId::new())).unwrap();
        assert_eq!(codes(&effects), vec!["validate"]);

        let mut new_only = slot(ValidatePolicy::NewOnly);
        new_only.transition(Input::Provision).unwrap();
        settle(&mut new_only, Completion::Created(Ok("R1")));
        settle(&mut new_only, Completion::Validated("R1", Ok(())));
        let effects = new_only.transition(Input::Reserve(RequestId::new())).unwrap();
        assert_eq!(codes(&effects), vec!["ready"]);
    }

    #[test]
    fn invalid_inputs_are_rejected_without_change() {
        let mut slot = slot(ValidatePolicy::Never);
        let err = slot.transition(Input::Acquire).unwrap_err();
        assert!(err.is_bug());
        assert_eq!(
            err.to_string(),
            "Invalid transition for slot 1: cannot acquire while empty"
        );
        assert_eq!(slot.state(), SlotState::Empty);

        slot.transition(Input::Provision).unwrap();
        let err = slot
            .transition(Input::Release {
                resource: "R1",
                reset: false,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::InvalidTransition {
                state: SlotState::Pending,
                input: "release",
                ..
            }
        ));
    }

    #[test]
    fn lost_resource_is_a_zombie() {
        let mut slot = slot(ValidatePolicy::Always);
        slot.transition(Input::Reserve(RequestId::new())).unwrap();
        settle(&mut slot, Completion::Created(Ok("R1")));

        let effects = settle(
            &mut slot,
            Completion::Lost(CommandKind::Validate, cause("panicked")),
        );
        assert_eq!(
            codes(&effects),
            vec!["RESOURCE_VALIDATION_ERROR", "failed"]
        );
        assert_eq!(slot.state(), SlotState::Zombie);
    }
}

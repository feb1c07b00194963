//! Event broadcasting for pool observability.
//!
//! Provides [`Event`] variants emitted while the pool and its slots change
//! state, and an [`EventBus`] backed by `tokio::sync::broadcast`.

use std::fmt;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::command::CommandKind;
use crate::error::{Cause, PoolError};
use crate::request::RequestId;
use crate::slot::SlotId;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Notifications emitted by a pool.
///
/// Events for one slot are published in the order its transitions happen.
/// There is no ordering guarantee across slots.
#[derive(Debug, Clone)]
pub enum Event {
    /// `start()` began provisioning the minimum pool size.
    PoolStarting,
    /// The pool finished starting.
    PoolStarted {
        /// Time taken to start.
        duration: Duration,
    },
    /// `stop()` began draining the pool.
    PoolStopping,
    /// The pool finished stopping.
    PoolStopped {
        /// Time taken to stop.
        duration: Duration,
    },
    /// A request joined the queue.
    RequestQueued {
        /// The request identifier.
        request: RequestId,
    },
    /// A request left the queue and was paired with a slot.
    RequestDispatched {
        /// The request identifier.
        request: RequestId,
        /// The slot serving the request.
        slot: SlotId,
        /// How many times the request has been dispatched before.
        attempt: u32,
    },
    /// A request will rejoin the queue after a backoff delay.
    RequestRequeued {
        /// The request identifier.
        request: RequestId,
        /// The delay before the request is queued again.
        delay: Duration,
        /// Why the previous attempt failed.
        cause: PoolError,
    },
    /// A request was satisfied.
    RequestFulfilled {
        /// The request identifier.
        request: RequestId,
        /// Time from queueing to fulfilment.
        duration: Duration,
    },
    /// A request gave up.
    RequestAborted {
        /// The request identifier.
        request: RequestId,
        /// Why the request was aborted.
        reason: PoolError,
    },
    /// A factory call completed successfully.
    CommandSucceeded {
        /// The slot the call ran for.
        slot: SlotId,
        /// Which factory call.
        kind: CommandKind,
        /// How long the call took.
        duration: Duration,
    },
    /// A factory call failed.
    CommandFailed {
        /// The slot the call ran for.
        slot: SlotId,
        /// Which factory call.
        kind: CommandKind,
        /// How long the call took.
        duration: Duration,
        /// The factory error.
        cause: Cause,
    },
    /// A factory call exceeded its timeout. It is still running.
    CommandTimedOut {
        /// The slot the call ran for.
        slot: SlotId,
        /// Which factory call.
        kind: CommandKind,
        /// The configured timeout.
        duration: Duration,
    },
    /// A resource was handed to a caller.
    ResourceAcquired {
        /// The slot holding the resource.
        slot: SlotId,
        /// The request that received it.
        request: RequestId,
    },
    /// A caller returned a resource.
    ResourceReleased {
        /// The slot holding the resource.
        slot: SlotId,
    },
    /// A slot was taken out of rotation after a timeout or abandonment.
    ResourceSegregated {
        /// The segregated slot.
        slot: SlotId,
    },
    /// An internal invariant was violated.
    PoolError {
        /// The defect.
        error: PoolError,
    },
}

impl Event {
    /// Stable machine readable code for this event.
    #[must_use]
    pub fn code(&self) -> &'static str {
        use CommandKind::{Create, Destroy, Reset, Validate};
        match self {
            Self::PoolStarting => "POOL_STARTING",
            Self::PoolStarted { .. } => "POOL_STARTED",
            Self::PoolStopping => "POOL_STOPPING",
            Self::PoolStopped { .. } => "POOL_STOPPED",
            Self::RequestQueued { .. } => "REQUEST_QUEUED",
            Self::RequestDispatched { .. } => "REQUEST_DISPATCHED",
            Self::RequestRequeued { .. } => "REQUEST_REQUEUED",
            Self::RequestFulfilled { .. } => "REQUEST_FULFILLED",
            Self::RequestAborted { .. } => "REQUEST_ABORTED",
            Self::CommandSucceeded { kind, .. } => match kind {
                Create => "RESOURCE_CREATED",
                Validate => "RESOURCE_VALIDATED",
                Reset => "RESOURCE_RESET",
                Destroy => "RESOURCE_DESTROYED",
            },
            Self::CommandFailed { kind, .. } => match kind {
                Create => "RESOURCE_CREATION_ERROR",
                Validate => "RESOURCE_VALIDATION_ERROR",
                Reset => "RESOURCE_RESET_ERROR",
                Destroy => "RESOURCE_DESTRUCTION_ERROR",
            },
            Self::CommandTimedOut { kind, .. } => match kind {
                Create => "RESOURCE_CREATION_TIMEOUT",
                Validate => "RESOURCE_VALIDATION_TIMEOUT",
                Reset => "RESOURCE_RESET_TIMEOUT",
                Destroy => "RESOURCE_DESTRUCTION_TIMEOUT",
            },
            Self::ResourceAcquired { .. } => "RESOURCE_ACQUIRED",
            Self::ResourceReleased { .. } => "RESOURCE_RELEASED",
            Self::ResourceSegregated { .. } => "RESOURCE_SEGREGATED",
            Self::PoolError { .. } => "POOL_ERROR",
        }
    }

    /// The slot this event concerns, if any.
    #[must_use]
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::RequestDispatched { slot, .. }
            | Self::CommandSucceeded { slot, .. }
            | Self::CommandFailed { slot, .. }
            | Self::CommandTimedOut { slot, .. }
            | Self::ResourceAcquired { slot, .. }
            | Self::ResourceReleased { slot }
            | Self::ResourceSegregated { slot } => Some(*slot),
            _ => None,
        }
    }

    /// The request this event concerns, if any.
    #[must_use]
    pub fn request(&self) -> Option<&RequestId> {
        match self {
            Self::RequestQueued { request }
            | Self::RequestDispatched { request, .. }
            | Self::RequestRequeued { request, .. }
            | Self::RequestFulfilled { request, .. }
            | Self::RequestAborted { request, .. }
            | Self::ResourceAcquired { request, .. } => Some(request),
            _ => None,
        }
    }

    /// How long the reported operation took, if measured.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::PoolStarted { duration }
            | Self::PoolStopped { duration }
            | Self::RequestFulfilled { duration, .. }
            | Self::CommandSucceeded { duration, .. }
            | Self::CommandFailed { duration, .. }
            | Self::CommandTimedOut { duration, .. } => Some(*duration),
            Self::RequestRequeued { delay, .. } => Some(*delay),
            _ => None,
        }
    }

    /// The underlying error, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::CommandFailed { cause, .. } => Some(cause.as_ref()),
            Self::RequestRequeued { cause, .. } => Some(cause),
            Self::RequestAborted { reason, .. } => Some(reason),
            Self::PoolError { error } => Some(error),
            _ => None,
        }
    }

    /// Whether this event frees capacity that waiting callers could use.
    pub(crate) fn frees_capacity(&self) -> bool {
        matches!(
            self,
            Self::ResourceReleased { .. }
                | Self::ResourceAcquired { .. }
                | Self::CommandSucceeded {
                    kind: CommandKind::Destroy,
                    ..
                }
                | Self::CommandFailed {
                    kind: CommandKind::Destroy,
                    ..
                }
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolStarting => write!(f, "Starting pool"),
            Self::PoolStarted { duration } => write!(f, "Pool started in {}ms", duration.as_millis()),
            Self::PoolStopping => write!(f, "Stopping pool"),
            Self::PoolStopped { duration } => write!(f, "Pool stopped in {}ms", duration.as_millis()),
            Self::RequestQueued { request } => write!(f, "Request {request} queued"),
            Self::RequestDispatched {
                request,
                slot,
                attempt,
            } => write!(f, "Request {request} dispatched to slot {slot} (attempt {attempt})"),
            Self::RequestRequeued {
                request,
                delay,
                cause,
            } => write!(
                f,
                "Request {request} requeued in {}ms: {cause}",
                delay.as_millis()
            ),
            Self::RequestFulfilled { request, duration } => write!(
                f,
                "Request {request} fulfilled in {}ms",
                duration.as_millis()
            ),
            Self::RequestAborted { request, reason } => {
                write!(f, "Request {request} aborted: {reason}")
            }
            Self::CommandSucceeded {
                slot,
                kind,
                duration,
            } => write!(
                f,
                "Resource in slot {slot}: {kind} succeeded in {}ms",
                duration.as_millis()
            ),
            Self::CommandFailed {
                slot,
                kind,
                duration,
                cause,
            } => write!(
                f,
                "Resource in slot {slot}: {kind} failed after {}ms: {cause}",
                duration.as_millis()
            ),
            Self::CommandTimedOut {
                slot,
                kind,
                duration,
            } => write!(
                f,
                "Resource in slot {slot}: {kind} timed out after {}ms",
                duration.as_millis()
            ),
            Self::ResourceAcquired { slot, request } => {
                write!(f, "Resource in slot {slot} acquired by request {request}")
            }
            Self::ResourceReleased { slot } => write!(f, "Resource in slot {slot} released"),
            Self::ResourceSegregated { slot } => write!(f, "Slot {slot} segregated"),
            Self::PoolError { error } => write!(f, "Pool error: {error}"),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for pool events.
///
/// Emission is fire-and-forget: if no subscribers are listening or a
/// subscriber lags, events are dropped rather than blocking the pool.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: Event) {
        tracing::trace!(code = event.code(), "{event}");
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(Event::PoolStarting);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(Event::ResourceReleased {
            slot: SlotId::new(3),
        });

        let event = rx.recv().await.expect("should receive event");
        assert_eq!(event.code(), "RESOURCE_RELEASED");
        assert_eq!(event.slot(), Some(SlotId::new(3)));
    }

    #[test]
    fn command_events_are_coded_by_kind() {
        let slot = SlotId::new(1);
        let duration = Duration::from_millis(5);
        let cause: Cause = std::sync::Arc::from(crate::error::BoxError::from("boom"));

        let created = Event::CommandSucceeded {
            slot,
            kind: CommandKind::Create,
            duration,
        };
        let failed = Event::CommandFailed {
            slot,
            kind: CommandKind::Destroy,
            duration,
            cause,
        };
        let timed_out = Event::CommandTimedOut {
            slot,
            kind: CommandKind::Validate,
            duration,
        };

        assert_eq!(created.code(), "RESOURCE_CREATED");
        assert_eq!(failed.code(), "RESOURCE_DESTRUCTION_ERROR");
        assert_eq!(timed_out.code(), "RESOURCE_VALIDATION_TIMEOUT");
        assert_eq!(failed.cause().map(ToString::to_string), Some("boom".into()));
        assert_eq!(timed_out.duration(), Some(duration));
        assert_eq!(
            failed.to_string(),
            "Resource in slot 1: destroy failed after 5ms: boom"
        );
    }

    #[test]
    fn capacity_events() {
        let slot = SlotId::new(1);
        assert!(Event::ResourceReleased { slot }.frees_capacity());
        assert!(
            Event::CommandSucceeded {
                slot,
                kind: CommandKind::Destroy,
                duration: Duration::ZERO,
            }
            .frees_capacity()
        );
        assert!(
            Event::CommandFailed {
                slot,
                kind: CommandKind::Destroy,
                duration: Duration::ZERO,
                cause: std::sync::Arc::from(crate::error::BoxError::from("stuck")),
            }
            .frees_capacity()
        );
        assert!(
            !Event::CommandSucceeded {
                slot,
                kind: CommandKind::Create,
                duration: Duration::ZERO,
            }
            .frees_capacity()
        );
    }
}

//! Timed, observable factory calls.
//!
//! A [`Command`] runs exactly one factory call on a spawned task under a
//! [`TimeLimit`]. The call is never cancelled: if the limit expires or the
//! command is aborted, the outcome carries a [`Belated`] handle that yields
//! the call's eventual result.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Cause, PoolError, PoolResult};
use crate::factory::Factory;
use crate::time_limit::{Race, TimeLimit};

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

/// The factory call a command wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `Factory::create`
    Create,
    /// `Factory::validate`
    Validate,
    /// `Factory::reset`
    Reset,
    /// `Factory::destroy`
    Destroy,
}

impl CommandKind {
    /// Lower-case operation name, used in errors and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Validate => "validate",
            Self::Reset => "reset",
            Self::Destroy => "destroy",
        }
    }

    /// Whether calls of this kind are serialised against one factory.
    #[must_use]
    pub fn is_serialised(self) -> bool {
        matches!(self, Self::Create | Self::Destroy)
    }

    /// Wrap a factory error raised by a call of this kind.
    #[must_use]
    pub fn failure(self, source: Cause) -> PoolError {
        match self {
            Self::Create => PoolError::CreationFailed { source },
            Self::Validate | Self::Reset => PoolError::ValidationFailed { source },
            Self::Destroy => PoolError::DestructionFailed { source },
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Result of one factory call, with the error made shareable.
pub type CommandResult<T> = Result<T, Cause>;

/// The settled result of a factory call.
///
/// Calls that borrow a resource hand it back alongside their result so the
/// slot can decide what happens to it next.
#[derive(Debug)]
pub enum Completion<R> {
    /// `create` settled.
    Created(CommandResult<R>),
    /// `validate` settled.
    Validated(R, CommandResult<()>),
    /// `reset` settled.
    Reset(R, CommandResult<()>),
    /// `destroy` settled.
    Destroyed(CommandResult<()>),
    /// The call panicked while holding the resource; the resource is gone.
    Lost(CommandKind, Cause),
}

impl<R> Completion<R> {
    /// The kind of call that settled.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Created(_) => CommandKind::Create,
            Self::Validated(..) => CommandKind::Validate,
            Self::Reset(..) => CommandKind::Reset,
            Self::Destroyed(_) => CommandKind::Destroy,
            Self::Lost(kind, _) => *kind,
        }
    }

    /// The factory error, if the call failed.
    #[must_use]
    pub fn error(&self) -> Option<&Cause> {
        match self {
            Self::Created(Err(cause))
            | Self::Validated(_, Err(cause))
            | Self::Reset(_, Err(cause))
            | Self::Destroyed(Err(cause))
            | Self::Lost(_, cause) => Some(cause),
            _ => None,
        }
    }

    /// Whether the call succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error().is_none()
    }

    fn joined(kind: CommandKind, joined: Result<Self, JoinError>) -> Self {
        match joined {
            Ok(completion) => completion,
            Err(err) => {
                let cause: Cause = Arc::new(err);
                match kind {
                    CommandKind::Create => Self::Created(Err(cause)),
                    CommandKind::Destroy => Self::Destroyed(Err(cause)),
                    CommandKind::Validate | CommandKind::Reset => Self::Lost(kind, cause),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// The event class a settled command reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Settled successfully before the deadline.
    Success,
    /// Failed before the deadline.
    Error,
    /// The deadline passed; the call is still running.
    Timeout,
    /// Succeeded after the deadline.
    PostTimeoutSuccess,
    /// Failed after the deadline.
    PostTimeoutError,
    /// Succeeded after the command was aborted.
    PostAbortSuccess,
    /// Failed after the command was aborted.
    PostAbortError,
}

impl Verdict {
    /// Verdict for a late settlement.
    #[must_use]
    pub fn belated(aborted: bool, success: bool) -> Self {
        match (aborted, success) {
            (false, true) => Self::PostTimeoutSuccess,
            (false, false) => Self::PostTimeoutError,
            (true, true) => Self::PostAbortSuccess,
            (true, false) => Self::PostAbortError,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
            Self::PostTimeoutSuccess => "POST_TIMEOUT_SUCCESS",
            Self::PostTimeoutError => "POST_TIMEOUT_ERROR",
            Self::PostAbortSuccess => "POST_ABORT_SUCCESS",
            Self::PostAbortError => "POST_ABORT_ERROR",
        })
    }
}

// ---------------------------------------------------------------------------
// Outcome / Belated
// ---------------------------------------------------------------------------

/// How one command execution ended.
#[derive(Debug)]
pub enum Outcome<R> {
    /// The call settled within its time limit.
    OnTime {
        /// The call's result.
        completion: Completion<R>,
        /// How long the call took.
        elapsed: Duration,
    },
    /// The time limit expired first.
    TimedOut(Belated<R>),
    /// The command was aborted first.
    Aborted(Belated<R>),
    /// The command was aborted while waiting for its turn; the factory
    /// was never called.
    Skipped,
}

impl<R> Outcome<R> {
    /// The verdict reported when the race ended. An aborted command has
    /// none until its call settles.
    #[must_use]
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::OnTime { completion, .. } if completion.is_success() => Some(Verdict::Success),
            Self::OnTime { .. } => Some(Verdict::Error),
            Self::TimedOut(_) => Some(Verdict::Timeout),
            Self::Aborted(_) | Self::Skipped => None,
        }
    }
}

/// A factory call that outlived its command's race.
#[derive(Debug)]
pub struct Belated<R> {
    kind: CommandKind,
    started: Instant,
    state: BelatedState<R>,
}

#[derive(Debug)]
enum BelatedState<R> {
    Running(JoinHandle<Completion<R>>),
    Settled(Completion<R>),
}

impl<R> Belated<R> {
    /// Wait for the call to settle. Returns its result and total runtime.
    pub async fn settle(self) -> (Completion<R>, Duration) {
        let completion = match self.state {
            BelatedState::Running(handle) => Completion::joined(self.kind, handle.await),
            BelatedState::Settled(completion) => completion,
        };
        (completion, self.started.elapsed())
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Lock shared by every command of one serialised kind.
pub type SerialLock = Arc<tokio::sync::Mutex<()>>;

/// One timed factory call.
pub struct Command<F: Factory> {
    kind: CommandKind,
    factory: Arc<F>,
    limit: TimeLimit,
    abort: CancellationToken,
    serial: Option<SerialLock>,
}

impl<F: Factory> Command<F> {
    /// Create a command. `serial` is held for the duration of the race
    /// when set, so serialised calls never overlap unless one times out.
    #[must_use]
    pub fn new(
        kind: CommandKind,
        factory: Arc<F>,
        timeout: Duration,
        abort: CancellationToken,
        serial: Option<SerialLock>,
    ) -> Self {
        Self {
            kind,
            factory,
            limit: TimeLimit::new(kind.name(), timeout, abort.clone()),
            abort,
            serial,
        }
    }

    /// Abort the command. The factory call, if started, keeps running.
    pub fn abort(&self) {
        self.limit.abort();
    }

    /// Run the factory call.
    ///
    /// `payload` is the resource for validate, reset and destroy; create
    /// takes none.
    pub async fn execute(&self, payload: Option<F::Resource>) -> PoolResult<Outcome<F::Resource>> {
        let started = Instant::now();
        let _permit = match &self.serial {
            Some(lock) if payload.is_none() => {
                let permit = tokio::select! {
                    biased;
                    () = self.abort.cancelled() => None,
                    guard = Arc::clone(lock).lock_owned() => Some(guard),
                };
                match permit {
                    Some(guard) if !self.abort.is_cancelled() => Some(guard),
                    _ => return Ok(Outcome::Skipped),
                }
            }
            Some(lock) => Some(Arc::clone(lock).lock_owned().await),
            None => None,
        };

        let task = self.spawn(payload)?;
        let outcome = match self.limit.restrict(task).await? {
            Race::OnTime { result, elapsed } => Outcome::OnTime {
                completion: Completion::joined(self.kind, result),
                elapsed,
            },
            Race::TimedOut(handle) => Outcome::TimedOut(Belated {
                kind: self.kind,
                started,
                state: BelatedState::Running(handle),
            }),
            Race::Aborted(handle) => Outcome::Aborted(Belated {
                kind: self.kind,
                started,
                state: BelatedState::Running(handle),
            }),
        };
        Ok(outcome)
    }

    fn spawn(&self, payload: Option<F::Resource>) -> PoolResult<JoinHandle<Completion<F::Resource>>> {
        let factory = Arc::clone(&self.factory);
        let task = match (self.kind, payload) {
            (CommandKind::Create, None) => {
                tokio::spawn(async move {
                    Completion::Created(factory.create().await.map_err(Cause::from))
                })
            }
            (CommandKind::Validate, Some(resource)) => tokio::spawn(async move {
                let result = factory.validate(&resource).await.map_err(Cause::from);
                Completion::Validated(resource, result)
            }),
            (CommandKind::Reset, Some(mut resource)) => tokio::spawn(async move {
                let result = factory.reset(&mut resource).await.map_err(Cause::from);
                Completion::Reset(resource, result)
            }),
            (CommandKind::Destroy, Some(resource)) => {
                tokio::spawn(async move {
                    Completion::Destroyed(factory.destroy(resource).await.map_err(Cause::from))
                })
            }
            (kind, payload) => {
                return Err(PoolError::internal(format!(
                    "{kind} command called with{} a resource",
                    if payload.is_some() { "" } else { "out" }
                )));
            }
        };
        Ok(task)
    }
}

impl<F: Factory> fmt::Debug for Command<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind)
            .field("timeout", &self.limit.duration())
            .field("serialised", &self.serial.is_some())
            .finish()
    }
}

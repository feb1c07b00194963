//! Testing utilities for pools
//!
//! [`ScriptedFactory`] produces `String` resources named `R1`, `R2`, ... and
//! lets a test script failures and delays for each factory call, then
//! inspect the calls the pool made.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::command::CommandKind;
use crate::factory::{Factory, FactoryResult};

/// One scripted factory step.
#[derive(Debug, Clone, Default)]
pub struct Step {
    /// How long the call takes.
    pub delay: Duration,
    /// Error message to fail with, after the delay.
    pub error: Option<String>,
}

impl Step {
    /// A call that succeeds after `delay`.
    #[must_use]
    pub fn delayed(delay: Duration) -> Self {
        Self { delay, error: None }
    }

    /// A call that fails immediately with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            error: Some(message.into()),
        }
    }

    /// Fail with `message` once the delay has passed.
    #[must_use]
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

/// Record of a factory call, taken when the call starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryCall {
    /// `create()`; carries the name the resource will have if it succeeds.
    Create(String),
    /// `validate()` on the named resource.
    Validate(String),
    /// `reset()` on the named resource.
    Reset(String),
    /// `destroy()` on the named resource.
    Destroy(String),
}

impl FactoryCall {
    /// Which factory method was called.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Create(_) => CommandKind::Create,
            Self::Validate(_) => CommandKind::Validate,
            Self::Reset(_) => CommandKind::Reset,
            Self::Destroy(_) => CommandKind::Destroy,
        }
    }

    /// The resource the call concerned.
    #[must_use]
    pub fn resource(&self) -> &str {
        match self {
            Self::Create(name) | Self::Validate(name) | Self::Reset(name) | Self::Destroy(name) => {
                name
            }
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    create: VecDeque<Step>,
    validate: VecDeque<Step>,
    reset: VecDeque<Step>,
    destroy: VecDeque<Step>,
}

impl Script {
    fn next(&mut self, kind: CommandKind) -> Step {
        let steps = match kind {
            CommandKind::Create => &mut self.create,
            CommandKind::Validate => &mut self.validate,
            CommandKind::Reset => &mut self.reset,
            CommandKind::Destroy => &mut self.destroy,
        };
        steps.pop_front().unwrap_or_default()
    }
}

/// Factory whose calls follow a script.
///
/// Each call takes the next step scripted for its kind; once a kind's
/// script runs out its calls succeed immediately. Clones share the script
/// and the call history.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    script: Arc<Mutex<Script>>,
    call_history: Arc<Mutex<Vec<FactoryCall>>>,
    created: Arc<AtomicU32>,
}

impl ScriptedFactory {
    /// A factory with an empty script: every call succeeds at once.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next steps for `kind`.
    #[must_use]
    pub fn script(self, kind: CommandKind, steps: impl IntoIterator<Item = Step>) -> Self {
        {
            let mut script = self.script.lock();
            let queue = match kind {
                CommandKind::Create => &mut script.create,
                CommandKind::Validate => &mut script.validate,
                CommandKind::Reset => &mut script.reset,
                CommandKind::Destroy => &mut script.destroy,
            };
            queue.extend(steps);
        }
        self
    }

    /// Every call made so far, in start order.
    pub fn call_history(&self) -> Vec<FactoryCall> {
        self.call_history.lock().clone()
    }

    /// Number of calls of `kind` made so far.
    pub fn calls(&self, kind: CommandKind) -> usize {
        self.call_history
            .lock()
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    async fn perform(&self, kind: CommandKind, call: FactoryCall) -> FactoryResult<()> {
        let step = self.script.lock().next(kind);
        self.call_history.lock().push(call);
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        match step.error {
            Some(message) => Err(message.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Factory for ScriptedFactory {
    type Resource = String;

    async fn create(&self) -> FactoryResult<String> {
        let name = format!("R{}", self.created.fetch_add(1, Ordering::SeqCst) + 1);
        self.perform(CommandKind::Create, FactoryCall::Create(name.clone()))
            .await?;
        Ok(name)
    }

    async fn validate(&self, resource: &String) -> FactoryResult<()> {
        self.perform(CommandKind::Validate, FactoryCall::Validate(resource.clone()))
            .await
    }

    async fn reset(&self, resource: &mut String) -> FactoryResult<()> {
        self.perform(CommandKind::Reset, FactoryCall::Reset(resource.clone()))
            .await
    }

    async fn destroy(&self, resource: String) -> FactoryResult<()> {
        self.perform(CommandKind::Destroy, FactoryCall::Destroy(resource))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_calls_succeed() {
        let factory = ScriptedFactory::new();
        assert_eq!(factory.create().await.unwrap(), "R1");
        assert_eq!(factory.create().await.unwrap(), "R2");
        factory.destroy("R1".to_string()).await.unwrap();
        assert_eq!(
            factory.call_history(),
            vec![
                FactoryCall::Create("R1".to_string()),
                FactoryCall::Create("R2".to_string()),
                FactoryCall::Destroy("R1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn a_failed_create_still_uses_up_a_name() {
        let factory = ScriptedFactory::new().script(CommandKind::Create, [Step::failing("Oh Noes!")]);
        let err = factory.create().await.unwrap_err();
        assert_eq!(err.to_string(), "Oh Noes!");
        assert_eq!(factory.create().await.unwrap(), "R2");
        assert_eq!(factory.calls(CommandKind::Create), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_steps_take_their_time() {
        let factory = ScriptedFactory::new().script(
            CommandKind::Validate,
            [Step::delayed(Duration::from_millis(200)).then_fail("stale")],
        );
        let started = tokio::time::Instant::now();
        assert!(factory.validate(&"R1".to_string()).await.is_err());
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(factory.validate(&"R1".to_string()).await.is_ok());
    }
}

//! Binary async gate.
//!
//! A [`Latch`] lets any number of tasks wait until another task releases
//! them. It is armed with [`Latch::activate`], waited on with
//! [`Latch::block`] and opened with [`Latch::release`], after which it is
//! disarmed and may be armed again.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Reusable one-release-per-activation gate.
pub struct Latch<T = ()> {
    waiters: Mutex<Option<Vec<oneshot::Sender<T>>>>,
}

impl<T: Clone + Send + 'static> Latch<T> {
    /// Create a disarmed latch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(None),
        }
    }

    /// Arm the latch. Arming an already armed latch is a no-op and keeps
    /// the current waiters.
    pub fn activate(&self) {
        let mut waiters = self.waiters.lock();
        if waiters.is_none() {
            *waiters = Some(Vec::new());
        }
    }

    /// Whether the latch is currently armed.
    pub fn is_active(&self) -> bool {
        self.waiters.lock().is_some()
    }

    /// Wait for the next release.
    ///
    /// The waiter is registered when `block` is called, not when the
    /// returned future is first polled, so a caller may register while
    /// holding an outer lock and await after dropping it. Resolves to
    /// `None` straight away if the latch is not armed.
    pub fn block(&self) -> impl Future<Output = Option<T>> + Send + 'static + use<T> {
        let receiver = self.waiters.lock().as_mut().map(|waiters| {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            rx
        });
        async move {
            match receiver {
                Some(rx) => rx.await.ok(),
                None => None,
            }
        }
    }

    /// Wake every current waiter with `value` and disarm the latch.
    ///
    /// Returns the number of waiters woken. Releasing a disarmed latch is
    /// a no-op.
    pub fn release(&self, value: T) -> usize {
        let Some(waiters) = self.waiters.lock().take() else {
            return 0;
        };
        let mut woken = 0;
        for waiter in waiters {
            if waiter.send(value.clone()).is_ok() {
                woken += 1;
            }
        }
        woken
    }
}

impl<T: Clone + Send + 'static> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Latch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let waiters = self.waiters.lock();
        f.debug_struct("Latch")
            .field("active", &waiters.is_some())
            .field("waiters", &waiters.as_ref().map_or(0, Vec::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn block_resolves_immediately_when_not_armed() {
        let latch: Latch<u32> = Latch::new();
        assert_eq!(latch.block().await, None);
    }

    #[tokio::test]
    async fn release_wakes_every_waiter_with_the_same_value() {
        let latch = Latch::new();
        latch.activate();
        let first = latch.block();
        let second = latch.block();

        assert_eq!(latch.release("go"), 2);
        assert_eq!(first.await, Some("go"));
        assert_eq!(second.await, Some("go"));
        assert!(!latch.is_active());
    }

    #[tokio::test]
    async fn activate_twice_keeps_one_generation() {
        let latch = Latch::new();
        latch.activate();
        let waiter = latch.block();
        latch.activate();

        assert_eq!(latch.release(1), 1);
        assert_eq!(waiter.await, Some(1));
    }

    #[tokio::test]
    async fn latch_can_be_rearmed_after_release() {
        let latch = Latch::new();
        latch.activate();
        latch.release(1);

        latch.activate();
        let waiter = latch.block();
        assert!(latch.is_active());
        assert_eq!(latch.release(2), 1);
        assert_eq!(waiter.await, Some(2));
    }

    #[test]
    fn release_without_activation_is_a_no_op() {
        let latch = Latch::new();
        assert_eq!(latch.release(()), 0);
        assert!(!latch.is_active());
    }
}

//! RAII handle to an acquired resource

use crate::pool::PoolId;
use crate::slot::SlotId;

type Restore<R> = Box<dyn FnOnce(SlotId, R) + Send + Sync>;

/// Exclusive access to a pooled resource.
///
/// When the lease is dropped the resource is released back to its pool.
/// Pass it to `Pool::destroy` instead to have the resource destroyed.
pub struct Lease<R> {
    pool: PoolId,
    slot: SlotId,
    resource: Option<R>,
    on_drop: Option<Restore<R>>,
}

impl<R> Lease<R> {
    /// Create a lease on `resource`, held in `slot` of `pool`. `on_drop`
    /// receives the resource back when the lease is dropped.
    pub(crate) fn new<F>(pool: PoolId, slot: SlotId, resource: R, on_drop: F) -> Self
    where
        F: FnOnce(SlotId, R) + Send + Sync + 'static,
    {
        Self {
            pool,
            slot,
            resource: Some(resource),
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// The pool this lease belongs to.
    #[must_use]
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// The slot holding the resource.
    #[must_use]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Take the lease apart without returning the resource.
    pub(crate) fn into_parts(mut self) -> (PoolId, SlotId, R) {
        self.on_drop.take();
        let resource = self.resource.take().expect("lease used after into_parts");
        (self.pool, self.slot, resource)
    }
}

impl<R> std::ops::Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource.as_ref().expect("lease used after into_parts")
    }
}

impl<R> std::ops::DerefMut for Lease<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("lease used after into_parts")
    }
}

impl<R> Drop for Lease<R> {
    fn drop(&mut self) {
        if let (Some(resource), Some(on_drop)) = (self.resource.take(), self.on_drop.take()) {
            on_drop(self.slot, resource);
        }
    }
}

impl<R: std::fmt::Debug> std::fmt::Debug for Lease<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool)
            .field("slot", &self.slot)
            .field("resource", &self.resource)
            .finish()
    }
}

//! The resource factory trait.
//!
//! A [`Factory`] tells the pool how to create, validate, reset and destroy
//! the resources it manages. Each call may fail, or may hang past its
//! configured timeout, in which case the pool keeps watching for the late
//! result and cleans up after it.

use async_trait::async_trait;

use crate::error::BoxError;

/// Result type for factory calls.
pub type FactoryResult<T> = std::result::Result<T, BoxError>;

/// Creates and disposes of pooled resources.
///
/// Calls run on spawned tasks and are never cancelled, even after the pool
/// has given up waiting for them. `create` and `destroy` are never called
/// concurrently on the same factory; `validate` and `reset` may be.
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    /// The resource type produced by this factory.
    type Resource: Send + Sync + 'static;

    /// Create a new resource.
    async fn create(&self) -> FactoryResult<Self::Resource>;

    /// Check that a resource is fit to hand out.
    async fn validate(&self, _resource: &Self::Resource) -> FactoryResult<()> {
        Ok(())
    }

    /// Restore a released resource to a clean state.
    ///
    /// Only called when the pool's reset policy is `ResetPolicy::Always`.
    async fn reset(&self, _resource: &mut Self::Resource) -> FactoryResult<()> {
        Ok(())
    }

    /// Dispose of a resource permanently.
    async fn destroy(&self, resource: Self::Resource) -> FactoryResult<()> {
        drop(resource);
        Ok(())
    }
}

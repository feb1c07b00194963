//! # Berth
//!
//! Generic async resource pool. A [`Pool`] hands out exclusive [`Lease`]s
//! on resources produced by a user supplied [`Factory`], queues callers
//! fairly when it is at capacity, and bounds every factory call by a
//! timeout without ever cancelling it: a call that overruns is abandoned
//! and whatever it eventually returns is cleaned up.
//!
//! ```no_run
//! use berth::{Factory, FactoryResult, Pool, PoolConfig};
//!
//! struct Connections;
//!
//! #[async_trait::async_trait]
//! impl Factory for Connections {
//!     type Resource = String;
//!
//!     async fn create(&self) -> FactoryResult<String> {
//!         Ok("connection".to_string())
//!     }
//! }
//!
//! # async fn run() -> berth::PoolResult<()> {
//! let pool = Pool::new(Connections, PoolConfig::default())?;
//! pool.start().await?;
//! let connection = pool.acquire().await?;
//! println!("{}", *connection);
//! pool.release(connection);
//! pool.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod latch;
pub mod lease;
pub mod pool;
pub mod queue;
pub mod repository;
pub mod request;
pub mod slot;
pub mod time_limit;

#[cfg(feature = "testing")]
pub mod testing;

pub use backoff::{Backoff, BackoffConfig};
pub use command::CommandKind;
pub use config::{PoolConfig, ResetPolicy, ValidatePolicy};
pub use error::{BoxError, Cause, PoolError, PoolResult};
pub use events::{Event, EventBus};
pub use factory::{Factory, FactoryResult};
pub use lease::Lease;
pub use pool::{Pool, PoolId, PoolState, PoolStats};
pub use request::RequestId;
pub use slot::{SlotId, SlotState};

//! # Tandem: Concurrent Task Execution Core
//!
//! Tandem bundles the building blocks of a small in-process job runtime: a worker pool fed
//! through bounded queues, a token-bucket rate limiter, a concurrent key-value state with two
//! interchangeable backends, and the coordination primitives they are built from.
//!
//! Everything runs on plain OS threads. Every blocking call can be bounded by a deadline and
//! reports expiry as a `TimedOut` error without side effects.
//!
//! ## Module Organization
//!
//! * [`common`] - Error type, result alias and [`common::Configuration`]
//! * [`pool`] - [`pool::WorkerPool`], jobs, results and the result stream
//! * [`limiter`] - [`limiter::RateLimiter`]
//! * [`state`] - [`state::KeyValueState`] with the actor and lock-based backends
//! * [`workflow`] - Bounded queues, reply ports, cancellation, timers, `wait_first` and the
//!   completion tracker
//!
//! ## Getting Started
//!
//! ```ignore
//! use tandem::{common::Configuration, pool::{Job, WorkerPool}, workflow::context::RuntimeContext};
//!
//! let ctx = RuntimeContext::new(Configuration::default())?;
//! let pool = WorkerPool::from_context(&ctx, |_job, x: u64| Ok::<_, String>(x * 2))?;
//! let results = pool.results()?;
//! pool.submit(Job::new(1, 21))?;
//! pool.close();
//! for result in results {
//!     println!("{:?}", result?.into_outcome()?);
//! }
//! ```
//!
//! Components created from one [`workflow::context::RuntimeContext`] share its configuration
//! and stop together when the context is shut down.

pub use tandem_common as common;
pub use tandem_limiter as limiter;
pub use tandem_pool as pool;
pub use tandem_state as state;
pub use tandem_workflow as workflow;

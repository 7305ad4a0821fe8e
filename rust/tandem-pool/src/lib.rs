//! Fixed-size worker pool with bounded submission and result queues.
//!
//! Jobs enter through a bounded queue, are processed by `worker_count` named threads, and
//! each produces exactly one [`JobResult`] on the result stream. Results are not ordered
//! with respect to submission; correlate them by [`JobId`].
//!
//! A handler returning an error fails only its own job. A handler that panics is fatal to
//! the pool: the panic is caught on the worker, pending jobs are discarded, and the failure
//! is surfaced as a `HandlerPanic` error by later submissions, at the end of the result
//! stream, and by [`WorkerPool::join`].

mod job;
mod pool;
mod stream;

pub use job::{Job, JobContext, JobId, JobResult};
pub use pool::WorkerPool;
pub use stream::ResultStream;

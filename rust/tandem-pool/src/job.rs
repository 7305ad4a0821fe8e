use std::time::{Duration, Instant};

use tandem_common::{Error, Result};
use tandem_workflow::signal::{CancellationToken, Deadline};

/// Identifies a job and the result it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        JobId(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work: an identifier and the payload handed to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job<P> {
    pub id: JobId,
    pub payload: P,
}

impl<P> Job<P> {
    pub fn new(id: impl Into<JobId>, payload: P) -> Job<P> {
        Job {
            id: id.into(),
            payload,
        }
    }
}

/// The outcome of one job. Handler errors arrive here as `HandlerFailure`.
#[derive(Debug)]
pub struct JobResult<U> {
    pub job_id: JobId,
    pub outcome: Result<U>,
}

impl<U> JobResult<U> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&U> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }

    pub fn into_outcome(self) -> Result<U> {
        self.outcome
    }
}

/// Per-invocation information passed to context-aware handlers.
///
/// Handlers are not interrupted: the deadline and the cancellation token are advisory, and a
/// long-running handler is expected to poll [`check`](Self::check) between steps.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    worker: usize,
    deadline: Deadline,
    cancel: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        worker: usize,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> JobContext {
        JobContext {
            job_id,
            worker,
            deadline: Deadline::from_timeout(timeout),
            cancel,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Index of the worker running the job, in `0..worker_count`.
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Time left before the job deadline, `None` when the pool has no job timeout.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.remaining(Instant::now())
    }

    /// Cancelled when the pool fails or its runtime context shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with `Cancelled` or `TimedOut` once the handler should stop.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled(format!("job {}", self.job_id)));
        }
        if self.deadline.is_expired() {
            return Err(Error::timed_out(format!("job {}", self.job_id)));
        }
        Ok(())
    }
}

use std::sync::Arc;

use tandem_common::{Error, Result};
use tandem_workflow::{
    bounded_queue::{Receiver, RecvError},
    signal::Deadline,
};

use crate::{JobResult, pool::PoolShared};

/// The consuming end of a pool's result queue.
///
/// Iterating yields `Ok(result)` for every finished job, in completion order. The stream ends
/// once the pool is closed and every worker has exited. If a handler panicked, the last item
/// before the end is the `HandlerPanic` error.
///
/// Clones share the underlying queue: each result is delivered to exactly one of them.
pub struct ResultStream<U> {
    receiver: Receiver<JobResult<U>>,
    shared: Arc<PoolShared>,
    failure_reported: bool,
}

impl<U> std::fmt::Debug for ResultStream<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("failure_reported", &self.failure_reported)
            .finish_non_exhaustive()
    }
}

impl<U> ResultStream<U> {
    pub(crate) fn new(receiver: Receiver<JobResult<U>>, shared: Arc<PoolShared>) -> Self {
        ResultStream {
            receiver,
            shared,
            failure_reported: false,
        }
    }

    /// Waits for the next result until `deadline`.
    ///
    /// Returns `Ok(None)` once the stream has ended and `TimedOut` if nothing arrived in
    /// time.
    pub fn next_until(&mut self, deadline: Deadline) -> Result<Option<JobResult<U>>> {
        match self.receiver.recv_until(deadline) {
            Ok(result) => Ok(Some(result)),
            Err(RecvError::Closed) => self.finish().transpose(),
            Err(e) => Err(e.into_error("result stream")),
        }
    }

    /// The underlying queue, for use with [`tandem_workflow::multiplex::wait_first`].
    /// Once it reports closure, check [`failure`](Self::failure).
    pub fn receiver(&self) -> &Receiver<JobResult<U>> {
        &self.receiver
    }

    /// The `HandlerPanic` error, if the pool failed.
    pub fn failure(&self) -> Option<Error> {
        self.shared.failure()
    }

    fn finish(&mut self) -> Option<Result<JobResult<U>>> {
        if self.failure_reported {
            return None;
        }
        self.failure_reported = true;
        self.shared.failure().map(Err)
    }
}

impl<U> Iterator for ResultStream<U> {
    type Item = Result<JobResult<U>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.receiver.recv() {
            Ok(result) => Some(Ok(result)),
            Err(_) => self.finish(),
        }
    }
}

impl<U> Clone for ResultStream<U> {
    fn clone(&self) -> Self {
        ResultStream::new(self.receiver.clone(), self.shared.clone())
    }
}

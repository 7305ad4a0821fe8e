use std::{
    any::Any,
    fmt::Display,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tandem_common::{Configuration, Error, Result};
use tandem_limiter::RateLimiter;
use tandem_workflow::{
    bounded_queue::{Receiver, SendError, Sender, bounded},
    completion::CompletionTracker,
    context::RuntimeContext,
    multiplex::{Event, Fired, wait_first},
    signal::{CancellationToken, Deadline},
};

use crate::{Job, JobContext, JobId, JobResult, ResultStream};

type Handler<P, U> = dyn Fn(&JobContext, P) -> Result<U> + Send + Sync;

/// A fixed set of worker threads consuming jobs from a bounded queue.
///
/// Submission blocks while the job queue is full (use [`try_submit`](Self::try_submit) or
/// [`submit_until`](Self::submit_until) to bound the wait). Every accepted job yields exactly
/// one [`JobResult`] on the stream returned by [`results`](Self::results); publication
/// blocks while the result queue is full, so the stream must be drained (or dropped) for the
/// pool to make progress.
///
/// After [`close`](Self::close) no new jobs are accepted, queued jobs still run, and the
/// result stream ends once the last worker exits.
pub struct WorkerPool<P, U> {
    jobs: Sender<Job<P>>,
    results: Mutex<Option<Receiver<JobResult<U>>>>,
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

pub(crate) struct PoolShared {
    tracker: CompletionTracker,
    cancel: CancellationToken,
    failure: OnceLock<PanicReport>,
    next_id: AtomicU64,
    job_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
struct PanicReport {
    job_id: JobId,
    worker: usize,
    message: String,
}

impl PoolShared {
    pub(crate) fn failure(&self) -> Option<Error> {
        self.failure
            .get()
            .map(|r| Error::handler_panic(r.job_id.0, r.worker, r.message.clone()))
    }

    fn job_finished(&self) {
        // Underflow is logged by the tracker itself.
        let _ = self.tracker.done();
    }
}

impl<P: Send + 'static, U: Send + 'static> WorkerPool<P, U> {
    /// Starts `config.worker_count` workers running `handler` on each job payload.
    pub fn new<F, E>(config: &Configuration, handler: F) -> Result<WorkerPool<P, U>>
    where
        F: Fn(P) -> std::result::Result<U, E> + Send + Sync + 'static,
        E: Display,
    {
        Self::with_context(config, move |_: &JobContext, payload| handler(payload))
    }

    /// Like [`new`](Self::new), with a handler that also receives the [`JobContext`].
    pub fn with_context<F, E>(config: &Configuration, handler: F) -> Result<WorkerPool<P, U>>
    where
        F: Fn(&JobContext, P) -> std::result::Result<U, E> + Send + Sync + 'static,
        E: Display,
    {
        Self::start(config, CancellationToken::new(), handler)
    }

    /// Starts a pool sized by the context's configuration. Shutting the context down cancels
    /// the pool: queued jobs are discarded and running handlers observe cancellation.
    pub fn from_context<F, E>(ctx: &RuntimeContext, handler: F) -> Result<WorkerPool<P, U>>
    where
        F: Fn(&JobContext, P) -> std::result::Result<U, E> + Send + Sync + 'static,
        E: Display,
    {
        Self::start(ctx.config(), ctx.child_token(), handler)
    }

    fn start<F, E>(
        config: &Configuration,
        cancel: CancellationToken,
        handler: F,
    ) -> Result<WorkerPool<P, U>>
    where
        F: Fn(&JobContext, P) -> std::result::Result<U, E> + Send + Sync + 'static,
        E: Display,
    {
        config.validate()?;

        let handler: Arc<Handler<P, U>> = Arc::new(move |ctx: &JobContext, payload: P| {
            handler(ctx, payload).map_err(|e| Error::handler_failure(ctx.job_id().0, e.to_string()))
        });
        let shared = Arc::new(PoolShared {
            tracker: CompletionTracker::new("worker pool jobs"),
            cancel,
            failure: OnceLock::new(),
            next_id: AtomicU64::new(0),
            job_timeout: config.job_timeout,
        });

        let (jobs_tx, jobs_rx) = bounded(config.queue_capacity);
        let (results_tx, results_rx) = bounded(config.result_capacity);

        let mut workers = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let worker = Worker {
                index,
                jobs: jobs_rx.clone(),
                results: results_tx.clone(),
                handler: handler.clone(),
                shared: shared.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("tandem-worker-{index}"))
                .spawn(move || worker.run())
                .map_err(|e| {
                    jobs_tx.close();
                    Error::io("spawn worker thread", e)
                })?;
            workers.push(handle);
        }
        log::debug!(
            "worker pool started: {} workers, job queue {}, result queue {}",
            config.worker_count,
            config.queue_capacity,
            config.result_capacity
        );

        Ok(WorkerPool {
            jobs: jobs_tx,
            results: Mutex::new(Some(results_rx)),
            shared,
            workers: Mutex::new(workers),
            worker_count: config.worker_count,
        })
    }

    /// Enqueues a job, blocking while the job queue is full.
    ///
    /// Fails with `Closed` after [`close`](Self::close), or with `HandlerPanic` once a
    /// handler has panicked.
    pub fn submit(&self, job: Job<P>) -> Result<()> {
        self.submit_until(job, Deadline::never())
    }

    /// Enqueues a job, failing with `TimedOut` if there is no room before the deadline.
    pub fn submit_until(&self, job: Job<P>, deadline: Deadline) -> Result<()> {
        self.enqueue(job, |jobs, job| jobs.send_until(job, deadline))
    }

    /// Enqueues a job only if there is room right now, failing with `QueueFull` otherwise.
    pub fn try_submit(&self, job: Job<P>) -> Result<()> {
        self.enqueue(job, |jobs, job| jobs.try_send(job))
    }

    /// Enqueues `payload` under a freshly allocated id.
    pub fn submit_payload(&self, payload: P) -> Result<JobId> {
        let id = self.next_job_id();
        self.submit(Job::new(id, payload))?;
        Ok(id)
    }

    /// Takes a token from `limiter`, then enqueues the job. Both steps share one timeout.
    ///
    /// A token taken for a job that then fails to enqueue is not returned to the bucket.
    pub fn submit_paced(
        &self,
        job: Job<P>,
        limiter: &RateLimiter,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = Deadline::from_timeout(timeout);
        limiter.acquire_until(deadline, Some(&self.shared.cancel))?;
        self.submit_until(job, deadline)
    }

    fn enqueue(
        &self,
        job: Job<P>,
        send: impl FnOnce(&Sender<Job<P>>, Job<P>) -> std::result::Result<(), SendError<Job<P>>>,
    ) -> Result<()> {
        if let Some(failure) = self.shared.failure() {
            return Err(failure);
        }
        let id = job.id;
        // Registered before the job becomes visible to workers.
        self.shared.tracker.add(1);
        match send(&self.jobs, job) {
            Ok(()) => {
                log::trace!("job {id} submitted");
                Ok(())
            }
            Err(e) => {
                self.shared.job_finished();
                Err(match (e, self.shared.failure()) {
                    (SendError::Closed(_), Some(failure)) => failure,
                    (e @ SendError::Closed(_), None) => {
                        log::warn!("job {id} submitted after the pool was closed");
                        e.into_error("worker pool input")
                    }
                    (e, _) => e.into_error("worker pool input"),
                })
            }
        }
    }

    /// Takes the result stream. Only the first call succeeds; clone the stream to share it.
    pub fn results(&self) -> Result<ResultStream<U>> {
        let receiver = self
            .results
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::invalid_operation("results stream already taken"))?;
        Ok(ResultStream::new(receiver, self.shared.clone()))
    }
}

impl<P, U> WorkerPool<P, U> {
    /// Allocates a job id unique within this pool.
    pub fn next_job_id(&self) -> JobId {
        JobId(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Jobs submitted but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.shared.tracker.outstanding()
    }

    /// Stops accepting jobs. Queued jobs still run. Idempotent.
    pub fn close(&self) {
        if !self.jobs.is_closed() {
            log::debug!("worker pool input closed");
        }
        self.jobs.close();
    }

    /// Stops accepting jobs and discards queued ones; running handlers see their
    /// [`JobContext`] cancelled.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
        self.jobs.close();
    }

    pub fn is_failed(&self) -> bool {
        self.shared.failure.get().is_some()
    }

    /// The `HandlerPanic` error, once a handler has panicked.
    pub fn failure(&self) -> Option<Error> {
        self.shared.failure()
    }

    /// Blocks until every submitted job has finished (published its result or been
    /// discarded), failing with `TimedOut` after `timeout`.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> Result<()> {
        self.shared
            .tracker
            .wait_until(Deadline::from_timeout(timeout))?;
        match self.shared.failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// Closes the pool and waits for every worker to exit.
    ///
    /// If the result stream was never taken, pending results are discarded. Returns the
    /// `HandlerPanic` error if a handler panicked. Idempotent.
    pub fn join(&self) -> Result<()> {
        self.close();
        drop(self.results.lock().unwrap().take());
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        let mut abnormal = 0;
        for worker in workers {
            if worker.join().is_err() {
                abnormal += 1;
            }
        }
        if let Some(failure) = self.shared.failure() {
            return Err(failure);
        }
        if abnormal > 0 {
            return Err(Error::invalid_operation(format!(
                "{abnormal} worker threads terminated abnormally"
            )));
        }
        log::debug!("worker pool joined");
        Ok(())
    }
}

impl<P, U> Drop for WorkerPool<P, U> {
    fn drop(&mut self) {
        self.jobs.close();
    }
}

struct Worker<P, U> {
    index: usize,
    jobs: Receiver<Job<P>>,
    results: Sender<JobResult<U>>,
    handler: Arc<Handler<P, U>>,
    shared: Arc<PoolShared>,
}

impl<P, U> Worker<P, U> {
    fn run(self) {
        log::trace!("worker {} started", self.index);
        let mut processed = 0usize;
        loop {
            let events = [Event::Recv(&self.jobs), Event::Cancel(&self.shared.cancel)];
            match wait_first(&events, None) {
                Ok(selected) => match selected.fired {
                    Fired::Received(job) if !self.shared.cancel.is_cancelled() => {
                        self.execute(job);
                        processed += 1;
                    }
                    Fired::Received(job) => self.discard(job),
                    Fired::Cancelled => {
                        self.jobs.close();
                        while let Ok(job) = self.jobs.try_recv() {
                            self.discard(job);
                        }
                        break;
                    }
                    _ => break,
                },
                Err(_) => break,
            }
        }
        log::trace!("worker {} exiting after {processed} jobs", self.index);
    }

    fn execute(&self, job: Job<P>) {
        let Job { id, payload } = job;
        let ctx = JobContext::new(
            id,
            self.index,
            self.shared.job_timeout,
            self.shared.cancel.clone(),
        );
        match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(&ctx, payload))) {
            Ok(outcome) => {
                if let Err(e) = &outcome {
                    log::debug!("{e}");
                }
                let result = JobResult { job_id: id, outcome };
                if self.results.send(result).is_err() {
                    log::trace!("result of job {id} discarded: result stream closed");
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("worker {} panicked on job {id}: {message}", self.index);
                let _ = self.shared.failure.set(PanicReport {
                    job_id: id,
                    worker: self.index,
                    message,
                });
                self.shared.cancel.cancel();
                self.jobs.close();
            }
        }
        self.shared.job_finished();
    }

    fn discard(&self, job: Job<P>) {
        log::trace!("job {} discarded by worker {}", job.id, self.index);
        self.shared.job_finished();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

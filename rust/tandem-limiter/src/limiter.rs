use std::{
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tandem_common::{Error, Result, verify_arg};
use tandem_workflow::{
    context::RuntimeContext,
    multiplex::{Event, Fired, wait_first},
    signal::{CancellationToken, Deadline, Notifier},
    timer::Ticker,
};

/// A token bucket refilled by a background ticker.
///
/// The bucket starts full. Each successful acquisition removes one token; every refill
/// interval one token is added back, never exceeding the capacity. Callers never wait
/// longer than their timeout, and a zero timeout checks the bucket without blocking.
///
/// Dropping the limiter (or calling [`stop`](Self::stop)) stops the refill thread. The
/// limiter also stops when the cancellation token it was created with is cancelled.
pub struct RateLimiter {
    shared: Arc<Shared>,
    stop: CancellationToken,
    refill: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    capacity: usize,
    interval: Duration,
    tokens: Mutex<usize>,
    notifier: Arc<Notifier>,
}

impl Shared {
    fn take(&self) -> bool {
        let mut tokens = self.tokens.lock().unwrap();
        if *tokens == 0 {
            return false;
        }
        *tokens -= 1;
        true
    }

    fn refill(&self) {
        {
            let mut tokens = self.tokens.lock().unwrap();
            if *tokens >= self.capacity {
                return;
            }
            *tokens += 1;
        }
        self.notifier.notify();
    }
}

impl RateLimiter {
    /// Creates a full bucket of `capacity` tokens, refilled by one token per `interval`.
    pub fn new(capacity: usize, interval: Duration) -> Result<RateLimiter> {
        Self::with_token(capacity, interval, CancellationToken::new())
    }

    /// Creates a limiter sized by the context's configuration, stopped on context shutdown.
    pub fn from_context(ctx: &RuntimeContext) -> Result<RateLimiter> {
        let config = ctx.config();
        Self::with_token(
            config.bucket_capacity,
            config.refill_interval,
            ctx.child_token(),
        )
    }

    /// Creates a limiter that stops once `stop` is cancelled.
    pub fn with_token(
        capacity: usize,
        interval: Duration,
        stop: CancellationToken,
    ) -> Result<RateLimiter> {
        verify_arg!(capacity, capacity >= 1);
        verify_arg!(interval, !interval.is_zero());

        let shared = Arc::new(Shared {
            capacity,
            interval,
            tokens: Mutex::new(capacity),
            notifier: Notifier::new(),
        });
        stop.watch(&shared.notifier);

        let ticker = Ticker::new(interval)?;
        let refill = {
            let shared = shared.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("tandem-limiter-refill".to_string())
                .spawn(move || Self::refill_loop(shared, ticker, stop))
                .map_err(|e| Error::io("spawn rate limiter refill thread", e))?
        };
        log::debug!("rate limiter started: capacity {capacity}, refill every {interval:?}");

        Ok(RateLimiter {
            shared,
            stop,
            refill: Mutex::new(Some(refill)),
        })
    }

    fn refill_loop(shared: Arc<Shared>, ticker: Ticker, stop: CancellationToken) {
        loop {
            match wait_first::<()>(&[Event::Tick(&ticker), Event::Cancel(&stop)], None) {
                Ok(selected) if matches!(selected.fired, Fired::Tick(_)) => shared.refill(),
                _ => break,
            }
        }
        ticker.stop();
        log::trace!("rate limiter refill thread exiting");
    }

    /// Takes one token, waiting at most `timeout` for a refill.
    ///
    /// `None` waits as long as it takes; `Some(Duration::ZERO)` never blocks. Returns a
    /// `TimedOut` error if no token became available in time, in which case the bucket is
    /// left untouched.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<()> {
        self.acquire_until(Deadline::from_timeout(timeout), None)
    }

    /// Takes one token without blocking.
    pub fn try_acquire(&self) -> Result<()> {
        self.acquire(Some(Duration::ZERO))
    }

    /// Takes one token, giving up at `deadline` or as soon as `cancel` is cancelled.
    pub fn acquire_until(
        &self,
        deadline: Deadline,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        if let Some(cancel) = cancel {
            cancel.watch(&self.shared.notifier);
        }
        loop {
            let seen = self.shared.notifier.epoch();
            if self.stop.is_cancelled() {
                return Err(Error::closed("rate limiter"));
            }
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(Error::cancelled("rate limiter acquire"));
            }
            if self.shared.take() {
                return Ok(());
            }
            if deadline.has_passed(Instant::now()) {
                return Err(Error::timed_out("rate limiter acquire"));
            }
            self.shared.notifier.wait_past(seen, deadline);
        }
    }

    /// Tokens currently in the bucket.
    pub fn available(&self) -> usize {
        *self.shared.tokens.lock().unwrap()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Stops the refill thread and waits for it to exit. Subsequent acquisitions fail with
    /// `Closed`. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
        if let Some(handle) = self.refill.lock().unwrap().take() {
            let _ = handle.join();
            log::debug!("rate limiter stopped");
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.shared.capacity)
            .field("interval", &self.shared.interval)
            .field("available", &self.available())
            .finish()
    }
}

//! Waiting on several event sources at once.
//!
//! [`wait_first`] blocks the calling thread until the first of a set of sources resolves:
//! an item (or closure) on a queue, a ticker tick, a timer expiry or a cancellation. Exactly
//! one source is consumed per call.
//!
//! When several sources are ready at the same moment the winner is picked by scanning from
//! a random starting position, so no source can starve the others. Callers must not rely
//! on any particular order among simultaneously ready sources.
//!
//! ```ignore
//! let timeout = Timer::new(Duration::from_secs(1));
//! match wait_first(&[Event::Recv(&results), Event::Timer(&timeout)], None)? {
//!     Selected { fired: Fired::Received(result), .. } => handle(result),
//!     Selected { fired: Fired::Expired(_), .. } => give_up(),
//!     _ => {}
//! }
//! ```

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tandem_common::{Error, Result};

use crate::{
    bounded_queue::{Parked, Receiver, RecvError},
    signal::{CancellationToken, Deadline, Notifier},
    timer::{Ticker, Timer},
};

/// One source to wait on.
pub enum Event<'a, T> {
    /// Fires with the next item, or with [`Fired::Closed`] once the queue is closed and
    /// drained.
    Recv(&'a Receiver<T>),
    Tick(&'a Ticker),
    Timer(&'a Timer),
    Cancel(&'a CancellationToken),
}

// Manual impls: the derive would require `T: Clone`.
impl<T> Clone for Event<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Event<'_, T> {}

/// What a source produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Fired<T> {
    Received(T),
    Closed,
    Tick(Instant),
    Expired(Instant),
    Cancelled,
}

/// The winning source's position in the input slice, and what it produced.
#[derive(Debug, PartialEq, Eq)]
pub struct Selected<T> {
    pub index: usize,
    pub fired: Fired<T>,
}

impl<'a, T> Event<'a, T> {
    fn watch(&self, notifier: &Arc<Notifier>) {
        match self {
            Event::Recv(rx) => rx.watch(notifier),
            Event::Tick(ticker) => ticker.watch(notifier),
            Event::Timer(timer) => timer.watch(notifier),
            Event::Cancel(token) => token.watch(notifier),
        }
    }

    fn poll(&self, now: Instant) -> Option<Fired<T>> {
        match self {
            Event::Recv(rx) => match rx.try_recv() {
                Ok(item) => Some(Fired::Received(item)),
                Err(RecvError::Closed) => Some(Fired::Closed),
                Err(_) => None,
            },
            Event::Tick(ticker) => ticker.poll_tick(now).map(Fired::Tick),
            Event::Timer(timer) => timer.poll_expired(now).map(Fired::Expired),
            Event::Cancel(token) => token.is_cancelled().then_some(Fired::Cancelled),
        }
    }

    /// Registers a queue source as a waiting receiver for the duration of one sleep.
    fn park(&self) -> Option<Parked<'a, T>> {
        match *self {
            Event::Recv(rx) => Some(rx.park()),
            _ => None,
        }
    }

    /// The next instant this source becomes ready on its own, for time-based sources.
    fn wake_at(&self) -> Option<Instant> {
        match self {
            Event::Tick(ticker) => ticker.next_tick(),
            Event::Timer(timer) => timer.pending_deadline(),
            Event::Recv(_) | Event::Cancel(_) => None,
        }
    }
}

/// Blocks until one of `events` resolves or `timeout` elapses.
///
/// `None` waits without limit; `Some(Duration::ZERO)` only checks which sources are ready
/// right now. On timeout returns a `TimedOut` error and consumes nothing.
pub fn wait_first<T>(events: &[Event<'_, T>], timeout: Option<Duration>) -> Result<Selected<T>> {
    wait_first_until(events, Deadline::from_timeout(timeout))
}

pub fn wait_first_until<T>(events: &[Event<'_, T>], deadline: Deadline) -> Result<Selected<T>> {
    let notifier = Notifier::new();
    for event in events {
        event.watch(&notifier);
    }

    loop {
        let seen = notifier.epoch();
        let now = Instant::now();
        if let Some(selected) = poll_from_random_start(events, now) {
            return Ok(selected);
        }
        if deadline.has_passed(now) {
            return Err(Error::timed_out("wait_first"));
        }
        let wake = events.iter().filter_map(Event::wake_at).min();
        let parked = events.iter().filter_map(Event::park).collect::<Vec<_>>();
        notifier.wait_past(seen, deadline.min(Deadline::from(wake)));
        drop(parked);
    }
}

/// Non-blocking variant: the first ready source, if any.
pub fn try_first<T>(events: &[Event<'_, T>]) -> Option<Selected<T>> {
    poll_from_random_start(events, Instant::now())
}

fn poll_from_random_start<T>(events: &[Event<'_, T>], now: Instant) -> Option<Selected<T>> {
    if events.is_empty() {
        return None;
    }
    let start = fastrand::usize(..events.len());
    (0..events.len())
        .map(|offset| (start + offset) % events.len())
        .find_map(|index| {
            events[index]
                .poll(now)
                .map(|fired| Selected { index, fired })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_queue::bounded;
    use std::thread;

    #[test]
    fn test_ready_source_beats_long_timer() {
        let (tx, rx) = bounded(1);
        tx.send(5u32).unwrap();
        let timer = Timer::new(Duration::from_secs(60));
        let start = Instant::now();
        let selected = wait_first(&[Event::Timer(&timer), Event::Recv(&rx)], None).unwrap();
        assert_eq!(selected.index, 1);
        assert_eq!(selected.fired, Fired::Received(5));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(timer.stop());
    }

    #[test]
    fn test_timeout_when_nothing_fires() {
        let (_tx, rx) = bounded::<u32>(1);
        let start = Instant::now();
        let err = wait_first(&[Event::Recv(&rx)], Some(Duration::from_millis(40))).unwrap_err();
        assert!(err.is_timed_out());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(540), "{elapsed:?}");
    }

    #[test]
    fn test_zero_timeout_only_polls() {
        let token = CancellationToken::new();
        let err = wait_first::<()>(&[Event::Cancel(&token)], Some(Duration::ZERO)).unwrap_err();
        assert!(err.is_timed_out());
        token.cancel();
        let selected = wait_first::<()>(&[Event::Cancel(&token)], Some(Duration::ZERO)).unwrap();
        assert_eq!(selected.fired, Fired::Cancelled);
    }

    #[test]
    fn test_timer_wins_over_idle_queue() {
        let (_tx, rx) = bounded::<u32>(1);
        let timer = Timer::new(Duration::from_millis(30));
        let selected = wait_first(&[Event::Recv(&rx), Event::Timer(&timer)], None).unwrap();
        assert_eq!(selected.index, 1);
        assert_eq!(selected.fired, Fired::Expired(timer.deadline()));
    }

    #[test]
    fn test_wakes_on_send_from_other_thread() {
        let (tx, rx) = bounded(0);
        let token = CancellationToken::new();
        thread::scope(|s| {
            s.spawn(move || {
                thread::sleep(Duration::from_millis(30));
                tx.send("hello").unwrap();
            });
            let selected = wait_first(&[Event::Cancel(&token), Event::Recv(&rx)], None).unwrap();
            assert_eq!(selected.fired, Fired::Received("hello"));
        });
    }

    #[test]
    fn test_try_send_reaches_multiplexed_receiver() {
        let (tx, rx) = bounded(0);
        let token = CancellationToken::new();
        assert!(tx.try_send(1u32).is_err());
        thread::scope(|s| {
            let waiter =
                s.spawn(|| wait_first(&[Event::Recv(&rx), Event::Cancel(&token)], None).unwrap());
            let start = Instant::now();
            while tx.try_send(2).is_err() {
                assert!(start.elapsed() < Duration::from_secs(5));
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(waiter.join().unwrap().fired, Fired::Received(2));
        });
        assert!(tx.try_send(3).is_err());
    }

    #[test]
    fn test_closed_queue_is_ready() {
        let (tx, rx) = bounded::<u32>(1);
        drop(tx);
        let selected = wait_first(&[Event::Recv(&rx)], Some(Duration::from_secs(1))).unwrap();
        assert_eq!(selected.fired, Fired::Closed);
    }

    #[test]
    fn test_cancellation_interrupts_wait() {
        let token = CancellationToken::new();
        let ticker = Ticker::new(Duration::from_secs(60)).unwrap();
        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                token.cancel();
            });
            let selected =
                wait_first::<()>(&[Event::Tick(&ticker), Event::Cancel(&token)], None).unwrap();
            assert_eq!(selected.index, 1);
        });
    }

    #[test]
    fn test_simultaneously_ready_sources_are_not_starved() {
        let (tx_a, rx_a) = bounded(1000);
        let (tx_b, rx_b) = bounded(1000);
        for i in 0..1000 {
            tx_a.send(i).unwrap();
            tx_b.send(i).unwrap();
        }
        let mut wins = [0usize; 2];
        for _ in 0..1000 {
            let selected = try_first(&[Event::Recv(&rx_a), Event::Recv(&rx_b)]).unwrap();
            wins[selected.index] += 1;
        }
        assert!(wins[0] > 100, "{wins:?}");
        assert!(wins[1] > 100, "{wins:?}");
    }
}

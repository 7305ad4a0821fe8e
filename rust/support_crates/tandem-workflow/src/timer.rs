//! Periodic and one-shot time sources.
//!
//! Neither type owns a thread. A [`Ticker`] or [`Timer`] is a schedule that is evaluated
//! lazily whenever somebody polls it, either directly through `wait` or as one of the
//! sources passed to [`crate::multiplex::wait_first`].

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tandem_common::{Result, verify_arg};

use crate::signal::{Deadline, Notifier, Watchers};

/// Fires every `interval`, starting one interval after creation.
///
/// Ticks that nobody observes are dropped rather than queued: after a stall the ticker
/// delivers at most one tick and then realigns to the next multiple of its interval.
pub struct Ticker {
    interval: Duration,
    state: Mutex<TickerState>,
    watchers: Watchers,
}

struct TickerState {
    next: Instant,
    stopped: bool,
}

impl Ticker {
    pub fn new(interval: Duration) -> Result<Ticker> {
        verify_arg!(interval, !interval.is_zero());
        Ok(Ticker {
            interval,
            state: Mutex::new(TickerState {
                next: Instant::now() + interval,
                stopped: false,
            }),
            watchers: Watchers::default(),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consumes the pending tick if one is due at `now`, returning its scheduled time.
    pub fn poll_tick(&self, now: Instant) -> Option<Instant> {
        let mut state = self.state.lock().unwrap();
        if state.stopped || now < state.next {
            return None;
        }
        let fired = state.next;
        state.next = next_tick_after(fired, now, self.interval);
        Some(fired)
    }

    /// When the next tick is due, or `None` once stopped.
    pub fn next_tick(&self) -> Option<Instant> {
        let state = self.state.lock().unwrap();
        (!state.stopped).then_some(state.next)
    }

    /// Stops the ticker. No tick is delivered after `stop` returns.
    pub fn stop(&self) {
        self.state.lock().unwrap().stopped = true;
        self.watchers.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    pub fn watch(&self, notifier: &Arc<Notifier>) {
        self.watchers.register(notifier);
    }

    /// Blocks until the next tick. Returns `None` if the ticker is stopped first.
    pub fn wait(&self) -> Option<Instant> {
        let notifier = Notifier::new();
        self.watch(&notifier);
        loop {
            let seen = notifier.epoch();
            if let Some(tick) = self.poll_tick(Instant::now()) {
                return Some(tick);
            }
            let next = self.next_tick()?;
            notifier.wait_past(seen, Deadline::at(next));
        }
    }
}

/// Fires once, `delay` after creation, unless stopped first.
pub struct Timer {
    deadline: Instant,
    state: Mutex<TimerState>,
    watchers: Watchers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Pending,
    Fired,
    Stopped,
}

impl Timer {
    pub fn new(delay: Duration) -> Timer {
        Timer::at(Instant::now() + delay)
    }

    pub fn at(deadline: Instant) -> Timer {
        Timer {
            deadline,
            state: Mutex::new(TimerState::Pending),
            watchers: Watchers::default(),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Consumes the expiry if it is due at `now`. A timer expires at most once.
    pub fn poll_expired(&self, now: Instant) -> Option<Instant> {
        let mut state = self.state.lock().unwrap();
        if *state == TimerState::Pending && now >= self.deadline {
            *state = TimerState::Fired;
            return Some(self.deadline);
        }
        None
    }

    /// The expiry instant while the timer can still fire.
    pub fn pending_deadline(&self) -> Option<Instant> {
        (*self.state.lock().unwrap() == TimerState::Pending).then_some(self.deadline)
    }

    /// Prevents the timer from firing.
    ///
    /// Returns `true` if this call stopped the timer, `false` if it had already expired or
    /// been stopped.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != TimerState::Pending || Instant::now() >= self.deadline {
            return false;
        }
        *state = TimerState::Stopped;
        drop(state);
        self.watchers.notify_all();
        true
    }

    pub fn watch(&self, notifier: &Arc<Notifier>) {
        self.watchers.register(notifier);
    }

    /// Blocks until the timer expires. Returns `None` if it is stopped first or has already
    /// been consumed.
    pub fn wait(&self) -> Option<Instant> {
        let notifier = Notifier::new();
        self.watch(&notifier);
        loop {
            let seen = notifier.epoch();
            if let Some(at) = self.poll_expired(Instant::now()) {
                return Some(at);
            }
            let deadline = self.pending_deadline()?;
            notifier.wait_past(seen, Deadline::at(deadline));
        }
    }
}

/// The first tick slot strictly after `now`, skipping every slot missed since `fired`.
fn next_tick_after(fired: Instant, now: Instant, interval: Duration) -> Instant {
    let missed = now.saturating_duration_since(fired).as_nanos() / interval.as_nanos();
    let skip = u32::try_from(missed).unwrap_or(u32::MAX).saturating_add(1);
    match interval
        .checked_mul(skip)
        .and_then(|step| fired.checked_add(step))
    {
        Some(next) if next > now => next,
        _ => now + interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ticker_rejects_zero_interval() {
        assert!(Ticker::new(Duration::ZERO).is_err());
    }

    #[test]
    fn test_ticker_waits_one_interval() {
        let start = Instant::now();
        let ticker = Ticker::new(Duration::from_millis(30)).unwrap();
        let tick = ticker.wait().unwrap();
        assert!(tick >= start + Duration::from_millis(30));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_ticker_drops_missed_ticks() {
        let ticker = Ticker::new(Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(55));
        let now = Instant::now();
        assert!(ticker.poll_tick(now).is_some());
        assert!(ticker.poll_tick(now).is_none());
        assert!(ticker.next_tick().unwrap() > now);
    }

    #[test]
    fn test_next_tick_skips_missed_slots() {
        let interval = Duration::from_millis(10);
        let fired = Instant::now();
        assert_eq!(next_tick_after(fired, fired, interval), fired + interval);
        let now = fired + Duration::from_millis(35);
        assert_eq!(next_tick_after(fired, now, interval), fired + Duration::from_millis(40));
    }

    #[test]
    fn test_next_tick_after_very_long_stall() {
        // More missed slots than fit in a u32.
        let interval = Duration::from_nanos(1);
        let fired = Instant::now();
        let now = fired + Duration::from_secs(10);
        let next = next_tick_after(fired, now, interval);
        assert!(next > now);
        assert!(next <= now + interval);
    }

    #[test]
    fn test_ticker_stop_wakes_waiter() {
        let ticker = Ticker::new(Duration::from_secs(60)).unwrap();
        thread::scope(|s| {
            let waiter = s.spawn(|| ticker.wait());
            thread::sleep(Duration::from_millis(20));
            ticker.stop();
            assert_eq!(waiter.join().unwrap(), None);
        });
        assert!(ticker.is_stopped());
        assert!(ticker.poll_tick(Instant::now() + Duration::from_secs(120)).is_none());
    }

    #[test]
    fn test_timer_fires_once() {
        let timer = Timer::new(Duration::from_millis(20));
        assert_eq!(timer.wait(), Some(timer.deadline()));
        assert_eq!(timer.poll_expired(Instant::now()), None);
        assert!(!timer.stop());
    }

    #[test]
    fn test_timer_stop_prevents_firing() {
        let timer = Timer::new(Duration::from_secs(60));
        assert!(timer.stop());
        assert!(!timer.stop());
        assert_eq!(timer.wait(), None);
    }
}

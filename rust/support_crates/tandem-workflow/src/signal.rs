//! Wake-up signalling shared by every blocking primitive in this crate.
//!
//! A [`Notifier`] is a generation counter guarded by a condition variable. Sources that can
//! become ready (queues, tickers, timers, cancellation tokens) keep a list of weakly held
//! notifiers and bump each of them whenever their state changes. A waiter snapshots the
//! counter, re-checks its sources, and sleeps only while the counter is unchanged, so a
//! notification that races with the check is never lost.

use std::{
    sync::{
        Arc, Condvar, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// A point in time after which a blocking operation gives up, or [`Deadline::never`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn never() -> Deadline {
        Deadline(None)
    }

    pub fn at(instant: Instant) -> Deadline {
        Deadline(Some(instant))
    }

    pub fn after(timeout: Duration) -> Deadline {
        Deadline(Instant::now().checked_add(timeout))
    }

    /// `None` waits forever, `Some(Duration::ZERO)` does not wait at all.
    pub fn from_timeout(timeout: Option<Duration>) -> Deadline {
        match timeout {
            Some(timeout) => Deadline::after(timeout),
            None => Deadline::never(),
        }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn is_never(&self) -> bool {
        self.0.is_none()
    }

    pub fn has_passed(&self, now: Instant) -> bool {
        self.0.is_some_and(|at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.has_passed(Instant::now())
    }

    /// Time left until the deadline, saturating at zero. `None` for [`Deadline::never`].
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(now))
    }

    /// The earlier of the two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (Some(a), None) => Deadline(Some(a)),
            (None, b) => Deadline(b),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::never()
    }
}

impl From<Instant> for Deadline {
    fn from(instant: Instant) -> Self {
        Deadline::at(instant)
    }
}

impl From<Option<Instant>> for Deadline {
    fn from(instant: Option<Instant>) -> Self {
        Deadline(instant)
    }
}

/// A generation counter that waiters can sleep on.
pub struct Notifier {
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl Notifier {
    pub fn new() -> Arc<Notifier> {
        Arc::new(Notifier {
            epoch: Mutex::new(0),
            cond: Condvar::new(),
        })
    }

    /// Current generation. Take it *before* checking the state being waited on.
    pub fn epoch(&self) -> u64 {
        *self.epoch.lock().unwrap()
    }

    pub fn notify(&self) {
        let mut epoch = self.epoch.lock().unwrap();
        *epoch = epoch.wrapping_add(1);
        drop(epoch);
        self.cond.notify_all();
    }

    /// Blocks until the generation moves past `seen` or the deadline passes.
    ///
    /// Returns `true` if a notification arrived, `false` on timeout.
    pub fn wait_past(&self, seen: u64, deadline: Deadline) -> bool {
        let mut epoch = self.epoch.lock().unwrap();
        loop {
            if *epoch != seen {
                return true;
            }
            match deadline.instant() {
                None => epoch = self.cond.wait(epoch).unwrap(),
                Some(at) => {
                    let now = Instant::now();
                    if now >= at {
                        return false;
                    }
                    epoch = self.cond.wait_timeout(epoch, at - now).unwrap().0;
                }
            }
        }
    }
}

/// Weakly held notifiers interested in one source.
#[derive(Default)]
pub(crate) struct Watchers(Mutex<Vec<Weak<Notifier>>>);

impl Watchers {
    pub(crate) fn register(&self, notifier: &Arc<Notifier>) {
        let mut list = self.0.lock().unwrap();
        list.retain(|w| w.strong_count() > 0);
        let weak = Arc::downgrade(notifier);
        if !list.iter().any(|w| w.ptr_eq(&weak)) {
            list.push(weak);
        }
    }

    pub(crate) fn notify_all(&self) {
        let live = {
            let mut list = self.0.lock().unwrap();
            list.retain(|w| w.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect::<Vec<_>>()
        };
        for notifier in live {
            notifier.notify();
        }
    }
}

/// A shared, one-way cancellation flag.
///
/// Cloning yields another handle to the same flag. [`CancellationToken::child`] creates a
/// dependent token: cancelling the parent cancels the child, never the other way round.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    watchers: Watchers,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.watchers.notify_all();
        let children = std::mem::take(&mut *self.children.lock().unwrap());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        {
            let mut children = self.inner.children.lock().unwrap();
            if !self.is_cancelled() {
                children.retain(|w| w.strong_count() > 0);
                children.push(Arc::downgrade(&child.inner));
                return child;
            }
        }
        child.cancel();
        child
    }

    /// Registers `notifier` to be bumped when this token is cancelled.
    pub fn watch(&self, notifier: &Arc<Notifier>) {
        self.inner.watchers.register(notifier);
    }

    /// Blocks until the token is cancelled or the deadline passes.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn wait_until(&self, deadline: Deadline) -> bool {
        let notifier = Notifier::new();
        self.watch(&notifier);
        loop {
            let seen = notifier.epoch();
            if self.is_cancelled() {
                return true;
            }
            if !notifier.wait_past(seen, deadline) {
                return self.is_cancelled();
            }
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_deadline_min_and_remaining() {
        let now = Instant::now();
        let near = Deadline::at(now + Duration::from_millis(10));
        let far = Deadline::at(now + Duration::from_secs(10));
        assert_eq!(near.min(far), near);
        assert_eq!(Deadline::never().min(far), far);
        assert_eq!(Deadline::never().remaining(now), None);
        assert_eq!(
            near.remaining(now + Duration::from_secs(1)),
            Some(Duration::ZERO)
        );
        assert!(Deadline::from_timeout(Some(Duration::ZERO)).is_expired());
        assert!(!Deadline::from_timeout(None).is_expired());
    }

    #[test]
    fn test_notifier_wait_times_out() {
        let notifier = Notifier::new();
        let seen = notifier.epoch();
        let start = Instant::now();
        assert!(!notifier.wait_past(seen, Deadline::after(Duration::from_millis(30))));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_notification_before_wait_is_not_lost() {
        let notifier = Notifier::new();
        let seen = notifier.epoch();
        notifier.notify();
        assert!(notifier.wait_past(seen, Deadline::never()));
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancellationToken::new();
        thread::scope(|s| {
            let waiter = s.spawn(|| token.wait_until(Deadline::never()));
            thread::sleep(Duration::from_millis(20));
            token.cancel();
            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn test_child_token_follows_parent_only() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());

        parent.cancel();
        assert!(sibling.is_cancelled());
        assert!(parent.child().is_cancelled());
    }

    #[test]
    fn test_watchers_skip_dropped_notifiers() {
        let watchers = Watchers::default();
        let kept = Notifier::new();
        watchers.register(&kept);
        watchers.register(&kept);
        watchers.register(&Notifier::new());
        watchers.notify_all();
        assert_eq!(kept.epoch(), 1);
        assert_eq!(watchers.0.lock().unwrap().len(), 1);
    }
}

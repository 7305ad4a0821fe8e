//! Counting wait primitive.

use std::sync::{Condvar, Mutex};

use tandem_common::{Error, Result};

use crate::signal::Deadline;

/// Counts outstanding units of work and lets a coordinator block until all are done.
///
/// Every [`add`](Self::add) must happen-before the matching [`done`](Self::done): register
/// work before handing it to another thread. Unlike a one-shot latch the tracker can be
/// waited on repeatedly; each wait returns as soon as the count is zero.
pub struct CompletionTracker {
    name: String,
    count: Mutex<usize>,
    zero: Condvar,
}

impl CompletionTracker {
    /// `name` identifies the tracker in errors and log records.
    pub fn new(name: impl Into<String>) -> CompletionTracker {
        CompletionTracker {
            name: name.into(),
            count: Mutex::new(0),
            zero: Condvar::new(),
        }
    }

    pub fn add(&self, n: usize) {
        *self.count.lock().unwrap() += n;
    }

    /// Marks one unit done.
    ///
    /// Calling `done` more often than units were added is a programming error; it is
    /// reported as `CounterUnderflow` and leaves the count at zero.
    pub fn done(&self) -> Result<()> {
        let mut count = self.count.lock().unwrap();
        if *count == 0 {
            drop(count);
            log::error!("{}: done() called with no outstanding work", self.name);
            return Err(Error::counter_underflow(self.name.clone()));
        }
        *count -= 1;
        if *count == 0 {
            drop(count);
            self.zero.notify_all();
        }
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        *self.count.lock().unwrap()
    }

    /// Blocks until the count reaches zero. Returns immediately if nothing is outstanding.
    pub fn wait(&self) {
        let count = self.count.lock().unwrap();
        let _count = self.zero.wait_while(count, |c| *c > 0).unwrap();
    }

    /// Like [`wait`](Self::wait), failing with `TimedOut` once the deadline passes.
    pub fn wait_until(&self, deadline: Deadline) -> Result<()> {
        let Some(at) = deadline.instant() else {
            self.wait();
            return Ok(());
        };
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            let now = std::time::Instant::now();
            if now >= at {
                return Err(Error::timed_out(format!("waiting on {}", self.name)));
            }
            count = self.zero.wait_timeout(count, at - now).unwrap().0;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("name", &self.name)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        thread,
        time::{Duration, Instant},
    };
    use tandem_common::ErrorKind;

    #[test]
    fn test_wait_with_nothing_outstanding() {
        let tracker = CompletionTracker::new("idle");
        tracker.wait();
        tracker
            .wait_until(Deadline::after(Duration::ZERO))
            .unwrap();
    }

    #[test]
    fn test_wait_returns_after_last_done() {
        let tracker = CompletionTracker::new("tasks");
        tracker.add(8);
        let start = Instant::now();
        thread::scope(|s| {
            for i in 0..8 {
                let tracker = &tracker;
                s.spawn(move || {
                    thread::sleep(Duration::from_millis(10 * i));
                    tracker.done().unwrap();
                });
            }
            tracker.wait();
            assert_eq!(tracker.outstanding(), 0);
            assert!(start.elapsed() >= Duration::from_millis(70));
        });
    }

    #[test]
    fn test_wait_until_times_out() {
        let tracker = CompletionTracker::new("stuck");
        tracker.add(1);
        let err = tracker
            .wait_until(Deadline::after(Duration::from_millis(20)))
            .unwrap_err();
        assert!(err.is_timed_out());
        tracker.done().unwrap();
        tracker.wait_until(Deadline::never()).unwrap();
    }

    #[test]
    fn test_underflow_is_reported() {
        let tracker = CompletionTracker::new("jobs");
        tracker.add(1);
        tracker.done().unwrap();
        let err = tracker.done().unwrap_err();
        assert!(err.is_fatal());
        match err.kind() {
            ErrorKind::CounterUnderflow { counter } => assert_eq!(counter, "jobs"),
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_reusable_after_reaching_zero() {
        let tracker = CompletionTracker::new("rounds");
        for _ in 0..3 {
            tracker.add(2);
            thread::scope(|s| {
                s.spawn(|| tracker.done().unwrap());
                s.spawn(|| tracker.done().unwrap());
            });
            tracker.wait();
        }
    }
}

//! Single-value reply port.
//!
//! A requester keeps the [`OneshotReceiver`] and ships the [`OneshotSender`] along with its
//! request. The replier may [`commit`](OneshotSender::commit) before acting on the request:
//! a successful commit guarantees the requester will wait for the reply even if its own
//! deadline passes meanwhile, while a failed commit means the requester already gave up and
//! the request must be skipped. This is what lets a timed-out request stay free of side
//! effects.
//!
//! ## Lifecycle
//!
//! 1. Pending: waiting for a value; optionally committed by the sender.
//! 2. Ready: a value was sent and not yet received.
//! 3. Closed: the value was received, the sender was dropped without sending, or the
//!    receiver abandoned the port after a timeout.

use std::sync::{Arc, Condvar, Mutex};

use crate::signal::Deadline;

/// Creates a connected reply port.
pub fn channel<T>() -> (OneshotSender<T>, OneshotReceiver<T>) {
    let cell = Arc::new(Cell {
        state: Mutex::new(State::Pending { committed: false }),
        cond: Condvar::new(),
    });
    (OneshotSender(Some(cell.clone())), OneshotReceiver(cell))
}

pub struct OneshotSender<T>(Option<Arc<Cell<T>>>);

impl<T> OneshotSender<T> {
    /// Promises the receiver a reply.
    ///
    /// Returns `false` if the receiver has already abandoned the port, in which case the
    /// request this port belongs to must not be acted upon.
    pub fn commit(&self) -> bool {
        let Some(cell) = &self.0 else {
            return false;
        };
        let mut state = cell.state.lock().unwrap();
        match &mut *state {
            State::Pending { committed } => {
                *committed = true;
                true
            }
            _ => false,
        }
    }

    /// Delivers the value, or hands it back if the receiver is gone.
    pub fn send(mut self, value: T) -> Result<(), T> {
        let Some(cell) = self.0.take() else {
            return Err(value);
        };
        let mut state = cell.state.lock().unwrap();
        if !matches!(*state, State::Pending { .. }) {
            return Err(value);
        }
        *state = State::Ready(value);
        drop(state);
        cell.cond.notify_all();
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.0
            .as_ref()
            .is_some_and(|cell| matches!(*cell.state.lock().unwrap(), State::Pending { .. }))
    }
}

impl<T> Drop for OneshotSender<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.0.take() {
            let mut state = cell.state.lock().unwrap();
            if matches!(*state, State::Pending { .. }) {
                *state = State::Closed;
                drop(state);
                cell.cond.notify_all();
            }
        }
    }
}

pub struct OneshotReceiver<T>(Arc<Cell<T>>);

impl<T> OneshotReceiver<T> {
    /// Blocks until the value arrives or the sender is dropped.
    pub fn recv(&self) -> Result<T, OneshotError> {
        self.recv_until(Deadline::never())
    }

    /// Blocks until the value arrives, the sender is dropped, or the deadline passes.
    ///
    /// On timeout the port is abandoned, unless the sender has already committed, in which
    /// case the wait continues until the reply is sent.
    pub fn recv_until(&self, deadline: Deadline) -> Result<T, OneshotError> {
        let mut state = self.0.state.lock().unwrap();
        loop {
            match *state {
                State::Ready(_) => return Ok(self.take(&mut state)),
                State::Closed => return Err(OneshotError::Closed),
                State::Pending { committed: true } => {
                    state = self.0.cond.wait(state).unwrap();
                }
                State::Pending { committed: false } => {
                    let Some(remaining) = deadline.remaining(std::time::Instant::now()) else {
                        state = self.0.cond.wait(state).unwrap();
                        continue;
                    };
                    if remaining.is_zero() {
                        *state = State::Closed;
                        return Err(OneshotError::TimedOut);
                    }
                    state = self.0.cond.wait_timeout(state, remaining).unwrap().0;
                }
            }
        }
    }

    pub fn try_recv(&self) -> Result<T, OneshotError> {
        let mut state = self.0.state.lock().unwrap();
        match *state {
            State::Ready(_) => Ok(self.take(&mut state)),
            State::Closed => Err(OneshotError::Closed),
            State::Pending { .. } => Err(OneshotError::Empty),
        }
    }

    fn take(&self, state: &mut State<T>) -> T {
        match std::mem::replace(state, State::Closed) {
            State::Ready(value) => value,
            _ => unreachable!("take called on a port without a value"),
        }
    }
}

impl<T> Drop for OneshotReceiver<T> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock().unwrap();
        if matches!(*state, State::Pending { committed: false }) {
            *state = State::Closed;
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OneshotError {
    /// The sender went away without replying, or the value was already taken.
    Closed,
    /// `try_recv` found no value yet.
    Empty,
    /// The deadline passed before the sender committed; the port is now abandoned.
    TimedOut,
}

impl std::fmt::Display for OneshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OneshotError::Closed => write!(f, "reply port is closed"),
            OneshotError::Empty => write!(f, "no reply yet"),
            OneshotError::TimedOut => write!(f, "timed out waiting for reply"),
        }
    }
}

impl std::error::Error for OneshotError {}

struct Cell<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

enum State<T> {
    Pending { committed: bool },
    Ready(T),
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn test_send_then_recv() {
        let (tx, rx) = channel();
        assert!(tx.is_pending());
        tx.send(42).unwrap();
        assert_eq!(rx.recv(), Ok(42));
        assert_eq!(rx.try_recv(), Err(OneshotError::Closed));
    }

    #[test]
    fn test_dropped_sender_closes() {
        let (tx, rx) = channel::<u8>();
        assert_eq!(rx.try_recv(), Err(OneshotError::Empty));
        drop(tx);
        assert_eq!(rx.recv(), Err(OneshotError::Closed));
    }

    #[test]
    fn test_timeout_abandons_port() {
        let (tx, rx) = channel();
        let start = Instant::now();
        assert_eq!(
            rx.recv_until(Deadline::after(Duration::from_millis(20))),
            Err(OneshotError::TimedOut)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!tx.commit());
        assert_eq!(tx.send(1), Err(1));
    }

    #[test]
    fn test_commit_extends_wait_past_deadline() {
        let (tx, rx) = channel();
        assert!(tx.commit());
        thread::scope(|s| {
            s.spawn(move || {
                thread::sleep(Duration::from_millis(50));
                tx.send("late").unwrap();
            });
            assert_eq!(
                rx.recv_until(Deadline::after(Duration::from_millis(5))),
                Ok("late")
            );
        });
    }

    #[test]
    fn test_dropped_receiver_rejects_commit() {
        let (tx, rx) = channel::<u32>();
        drop(rx);
        assert!(!tx.commit());
        assert!(!tx.is_pending());
    }
}

//! Fixed-capacity multi-producer, multi-consumer FIFO queue.
//!
//! The queue is the only channel type used between tandem components: job submission,
//! result publication and the state actor's mailbox are all bounded queues.
//!
//! Differences from `std::sync::mpsc::sync_channel`:
//!
//! - Both halves can be cloned, so several workers can consume from one queue.
//! - Either half can [`close`](Sender::close) the queue explicitly. After close, sends fail
//!   with [`SendError::Closed`] while receivers drain the remaining items and then observe
//!   [`RecvError::Closed`].
//! - Every blocking operation has a deadline-bounded variant. A send that times out hands
//!   the item back and leaves the queue untouched.
//! - A capacity of 0 makes the queue a rendezvous: a blocking send returns only once a
//!   receiver has taken the item.
//! - Receivers can be watched by a [`Notifier`], which is how the multiplexer in
//!   [`crate::multiplex`] waits on several queues at once.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::Instant,
};

use tandem_common::Error;

use crate::signal::{Deadline, Notifier, Watchers};

/// Creates a bounded queue holding at most `capacity` items, returning its two halves.
///
/// `capacity == 0` creates a rendezvous queue.
pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            closed: false,
            producers: 1,
            consumers: 1,
            waiting_receivers: 0,
            pushed: 0,
            popped: 0,
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
        watchers: Watchers::default(),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

/// The sending half of a [`bounded`] queue.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Sends an item, blocking while the queue is full.
    pub fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.shared.send_until(item, Deadline::never())
    }

    /// Sends an item, giving it back with [`SendError::TimedOut`] if the deadline passes
    /// before there is room (or, for a rendezvous queue, before a receiver takes it).
    pub fn send_until(&self, item: T, deadline: Deadline) -> Result<(), SendError<T>> {
        self.shared.send_until(item, deadline)
    }

    /// Sends an item without blocking.
    ///
    /// On a rendezvous queue this succeeds only while a receiver is waiting for an item,
    /// either blocked in `recv` or parked in [`crate::multiplex::wait_first`], and no other
    /// item is pending hand-off. The item then stays queued until a receiver takes it: a
    /// receiver whose deadline passes takes a pending item instead of timing out, while a
    /// multiplexed receiver that picks a different ready source leaves it for the next
    /// receive.
    pub fn try_send(&self, item: T) -> Result<(), SendError<T>> {
        self.shared.try_send(item)
    }

    /// Closes the queue for every sender and receiver. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.lock().producers += 1;
        Sender {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.shared.drop_producer();
    }
}

/// The receiving half of a [`bounded`] queue.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Takes the oldest item, blocking while the queue is empty and open.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.shared.recv_until(Deadline::never())
    }

    pub fn recv_until(&self, deadline: Deadline) -> Result<T, RecvError> {
        self.shared.recv_until(deadline)
    }

    pub fn try_recv(&self) -> Result<T, RecvError> {
        self.shared.try_recv()
    }

    /// Closes the queue for every sender and receiver. Items already queued can still be
    /// received. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// `true` once the queue is closed, even if items remain to be drained.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }

    /// Registers `notifier` to be bumped whenever an item arrives or the queue closes.
    pub fn watch(&self, notifier: &Arc<Notifier>) {
        self.shared.watchers.register(notifier);
    }

    /// A blocking iterator that ends once the queue is closed and drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { receiver: self }
    }

    /// Counts the caller as a waiting receiver until the returned guard is dropped.
    pub(crate) fn park(&self) -> Parked<'_, T> {
        self.shared.lock().waiting_receivers += 1;
        Parked {
            shared: &self.shared,
        }
    }
}

/// A receiver registered as waiting by [`Receiver::park`].
pub(crate) struct Parked<'a, T> {
    shared: &'a Shared<T>,
}

impl<T> Drop for Parked<'_, T> {
    fn drop(&mut self) {
        self.shared.lock().waiting_receivers -= 1;
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.lock().consumers += 1;
        Receiver {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.drop_consumer();
    }
}

pub struct Iter<'a, T> {
    receiver: &'a Receiver<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.recv().ok()
    }
}

pub struct IntoIter<T> {
    receiver: Receiver<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.receiver.recv().ok()
    }
}

impl<'a, T> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T> IntoIterator for Receiver<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { receiver: self }
    }
}

/// Failure to send an item; the item is handed back.
#[derive(PartialEq, Eq, Clone, Copy)]
pub enum SendError<T> {
    /// The queue was closed, explicitly or because every receiver is gone.
    Closed(T),
    /// `try_send` found no room.
    Full(T),
    /// The deadline passed before the item could be delivered.
    TimedOut(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Closed(item) | SendError::Full(item) | SendError::TimedOut(item) => item,
        }
    }

    /// Converts into the shared error type, naming the queue as `resource`.
    pub fn into_error(self, resource: &str) -> Error {
        match self {
            SendError::Closed(_) => Error::closed(resource),
            SendError::Full(_) => Error::queue_full(resource),
            SendError::TimedOut(_) => Error::timed_out(format!("send to {resource}")),
        }
    }
}

impl<T> std::fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Closed(_) => write!(f, "Closed(..)"),
            SendError::Full(_) => write!(f, "Full(..)"),
            SendError::TimedOut(_) => write!(f, "TimedOut(..)"),
        }
    }
}

impl<T> std::fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Closed(_) => write!(f, "queue is closed"),
            SendError::Full(_) => write!(f, "queue is full"),
            SendError::TimedOut(_) => write!(f, "send timed out"),
        }
    }
}

impl<T> std::error::Error for SendError<T> {}

impl<T> From<SendError<T>> for Error {
    fn from(e: SendError<T>) -> Self {
        e.into_error("queue")
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecvError {
    /// The queue is closed and drained.
    Closed,
    /// `try_recv` found nothing.
    Empty,
    /// The deadline passed with nothing to receive.
    TimedOut,
}

impl RecvError {
    pub fn into_error(self, resource: &str) -> Error {
        match self {
            RecvError::Closed => Error::closed(resource),
            RecvError::Empty | RecvError::TimedOut => {
                Error::timed_out(format!("receive from {resource}"))
            }
        }
    }
}

impl std::fmt::Display for RecvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvError::Closed => write!(f, "queue is closed and empty"),
            RecvError::Empty => write!(f, "queue is empty"),
            RecvError::TimedOut => write!(f, "receive timed out"),
        }
    }
}

impl std::error::Error for RecvError {}

impl From<RecvError> for Error {
    fn from(e: RecvError) -> Self {
        e.into_error("queue")
    }
}

struct State<T> {
    queue: VecDeque<T>,
    capacity: usize,
    closed: bool,
    producers: usize,
    consumers: usize,
    /// Receivers currently blocked in `recv_until` or parked by the multiplexer.
    waiting_receivers: usize,
    /// Sequence numbers of the last enqueued and last dequeued item.
    pushed: u64,
    popped: u64,
}

impl<T> State<T> {
    fn slots(&self) -> usize {
        self.capacity.max(1)
    }

    fn push(&mut self, item: T) -> u64 {
        self.queue.push_back(item);
        self.pushed += 1;
        self.pushed
    }

    fn pop(&mut self) -> Option<T> {
        let item = self.queue.pop_front()?;
        self.popped += 1;
        Some(item)
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    watchers: Watchers,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap()
    }

    fn send_until(&self, item: T, deadline: Deadline) -> Result<(), SendError<T>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(SendError::Closed(item));
            }
            if state.queue.len() < state.slots() {
                break;
            }
            match self.wait(&self.not_full, state, deadline) {
                Some(s) => state = s,
                None => return Err(SendError::TimedOut(item)),
            }
        }

        let ticket = state.push(item);
        let rendezvous = state.capacity == 0;
        drop(state);
        self.item_added();

        if !rendezvous {
            return Ok(());
        }

        // Rendezvous: the item counts as delivered only once a receiver has taken it.
        let mut state = self.lock();
        loop {
            if state.popped >= ticket {
                return Ok(());
            }
            let expired = deadline.has_passed(Instant::now());
            if state.closed || expired {
                let closed = state.closed;
                // Only one item fits, so an untaken item at the back is ours.
                let Some(item) = state.queue.pop_back() else {
                    return Ok(());
                };
                state.pushed -= 1;
                drop(state);
                self.not_full.notify_all();
                return Err(if closed {
                    SendError::Closed(item)
                } else {
                    SendError::TimedOut(item)
                });
            }
            state = match self.wait(&self.not_full, state, deadline) {
                Some(s) => s,
                None => self.lock(),
            };
        }
    }

    fn try_send(&self, item: T) -> Result<(), SendError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(SendError::Closed(item));
        }
        let room = if state.capacity == 0 {
            state.queue.is_empty() && state.waiting_receivers > 0
        } else {
            state.queue.len() < state.capacity
        };
        if !room {
            return Err(SendError::Full(item));
        }
        state.push(item);
        drop(state);
        self.item_added();
        Ok(())
    }

    fn recv_until(&self, deadline: Deadline) -> Result<T, RecvError> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.pop() {
                drop(state);
                self.not_full.notify_all();
                return Ok(item);
            }
            if state.closed {
                return Err(RecvError::Closed);
            }
            state.waiting_receivers += 1;
            let waited = self.wait(&self.not_empty, state, deadline);
            state = waited.unwrap_or_else(|| self.lock());
            state.waiting_receivers -= 1;
            if deadline.has_passed(Instant::now()) && state.queue.is_empty() && !state.closed {
                return Err(RecvError::TimedOut);
            }
        }
    }

    fn try_recv(&self) -> Result<T, RecvError> {
        let mut state = self.lock();
        if let Some(item) = state.pop() {
            drop(state);
            self.not_full.notify_all();
            return Ok(item);
        }
        if state.closed {
            Err(RecvError::Closed)
        } else {
            Err(RecvError::Empty)
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.wake_all();
    }

    fn drop_producer(&self) {
        let mut state = self.lock();
        debug_assert!(state.producers >= 1);
        state.producers -= 1;
        if state.producers == 0 && !state.closed {
            state.closed = true;
            drop(state);
            self.wake_all();
        }
    }

    fn drop_consumer(&self) {
        let mut state = self.lock();
        debug_assert!(state.consumers >= 1);
        state.consumers -= 1;
        if state.consumers == 0 {
            state.closed = true;
            // A rendezvous sender is still waiting on its item and takes it back itself.
            if state.capacity > 0 {
                state.queue.clear();
            }
            drop(state);
            self.wake_all();
        }
    }

    fn item_added(&self) {
        self.not_empty.notify_one();
        self.watchers.notify_all();
    }

    fn wake_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
        self.watchers.notify_all();
    }

    /// Waits on `cond` until notified or the deadline passes. Returns `None` on timeout.
    fn wait<'a>(
        &'a self,
        cond: &Condvar,
        state: MutexGuard<'a, State<T>>,
        deadline: Deadline,
    ) -> Option<MutexGuard<'a, State<T>>> {
        match deadline.instant() {
            None => Some(cond.wait(state).unwrap()),
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    return None;
                }
                let (state, _) = cond.wait_timeout(state, at - now).unwrap();
                Some(state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn test_single_thread_fifo() {
        let (tx, rx) = bounded(5);
        for i in 0..5 {
            tx.send(i).unwrap();
        }
        assert_eq!(tx.len(), 5);
        assert_eq!(rx.iter().take(5).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_recv_blocks_until_send() {
        let (tx, rx) = bounded(1);
        thread::scope(|s| {
            let consumer = s.spawn(|| rx.recv().unwrap());
            thread::sleep(Duration::from_millis(50));
            tx.send("from other thread").unwrap();
            assert_eq!(consumer.join().unwrap(), "from other thread");
        });
    }

    #[test]
    fn test_send_blocks_on_full_queue() {
        let (tx, rx) = bounded(1);
        tx.send("first").unwrap();
        thread::scope(|s| {
            let producer = s.spawn(|| tx.send("second").unwrap());
            thread::sleep(Duration::from_millis(50));
            assert_eq!(rx.recv().unwrap(), "first");
            producer.join().unwrap();
        });
        assert_eq!(rx.recv().unwrap(), "second");
    }

    #[test]
    fn test_try_send_and_try_recv() {
        let (tx, rx) = bounded(2);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        match tx.try_send(3) {
            Err(SendError::Full(v)) => assert_eq!(v, 3),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
        assert_eq!(rx.try_recv(), Err(RecvError::Empty));
    }

    #[test]
    fn test_send_until_times_out_without_side_effects() {
        let (tx, rx) = bounded(1);
        tx.send(1).unwrap();
        let start = Instant::now();
        match tx.send_until(2, Deadline::after(Duration::from_millis(30))) {
            Err(SendError::TimedOut(v)) => assert_eq!(v, 2),
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.recv().unwrap(), 1);
    }

    #[test]
    fn test_recv_until_times_out() {
        let (_tx, rx) = bounded::<u32>(1);
        let start = Instant::now();
        assert_eq!(
            rx.recv_until(Deadline::after(Duration::from_millis(30))),
            Err(RecvError::TimedOut)
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_close_drains_then_reports_closed() {
        let (tx, rx) = bounded(5);
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        rx.close();
        rx.close();
        assert!(tx.is_closed());
        assert!(matches!(tx.send(3), Err(SendError::Closed(3))));
        assert_eq!(rx.recv(), Ok(1));
        assert_eq!(rx.recv(), Ok(2));
        assert_eq!(rx.recv(), Err(RecvError::Closed));
    }

    #[test]
    fn test_close_wakes_blocked_receiver() {
        let (tx, rx) = bounded::<u32>(1);
        thread::scope(|s| {
            let consumer = s.spawn(|| rx.recv());
            thread::sleep(Duration::from_millis(30));
            tx.close();
            assert_eq!(consumer.join().unwrap(), Err(RecvError::Closed));
        });
    }

    #[test]
    fn test_drop_senders_half_closes() {
        let (tx, rx) = bounded(5);
        let tx2 = tx.clone();
        tx.send(1).unwrap();
        drop(tx);
        assert!(!rx.is_closed());
        tx2.send(2).unwrap();
        drop(tx2);
        assert_eq!(rx.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_drop_receivers_discards_items() {
        let (tx, rx) = bounded(5);
        tx.send(100).unwrap();
        drop(rx);
        assert!(matches!(tx.send(200), Err(SendError::Closed(200))));
        assert_eq!(tx.len(), 0);
    }

    #[test]
    fn test_rendezvous_send_waits_for_receiver() {
        let (tx, rx) = bounded(0);
        assert_eq!(tx.capacity(), 0);
        thread::scope(|s| {
            let producer = s.spawn(|| {
                let start = Instant::now();
                tx.send(7).unwrap();
                start.elapsed()
            });
            thread::sleep(Duration::from_millis(50));
            assert_eq!(rx.recv().unwrap(), 7);
            assert!(producer.join().unwrap() >= Duration::from_millis(50));
        });
    }

    #[test]
    fn test_rendezvous_send_until_retracts_item() {
        let (tx, rx) = bounded(0);
        match tx.send_until(1, Deadline::after(Duration::from_millis(20))) {
            Err(SendError::TimedOut(v)) => assert_eq!(v, 1),
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert_eq!(rx.try_recv(), Err(RecvError::Empty));
        assert!(matches!(tx.try_send(2), Err(SendError::Full(2))));
    }

    #[test]
    fn test_rendezvous_try_send_reaches_blocked_receiver() {
        let (tx, rx) = bounded(0);
        assert!(matches!(tx.try_send(1), Err(SendError::Full(1))));
        thread::scope(|s| {
            let consumer = s.spawn(|| rx.recv().unwrap());
            thread::sleep(Duration::from_millis(50));
            tx.try_send(2).unwrap();
            assert_eq!(consumer.join().unwrap(), 2);
        });
        assert!(matches!(tx.try_send(3), Err(SendError::Full(3))));
    }

    #[test]
    fn test_rendezvous_try_send_item_outlives_parked_receiver() {
        let (tx, rx) = bounded(0);
        let parked = rx.park();
        tx.try_send(1).unwrap();
        // One hand-off at a time.
        assert!(matches!(tx.try_send(2), Err(SendError::Full(2))));
        drop(parked);

        assert!(matches!(tx.try_send(3), Err(SendError::Full(3))));
        // A receiver whose deadline already passed still takes the pending item.
        assert_eq!(rx.recv_until(Deadline::after(Duration::ZERO)), Ok(1));
        assert_eq!(rx.try_recv(), Err(RecvError::Empty));
    }

    #[test]
    fn test_rendezvous_sender_gets_item_back_on_close() {
        let (tx, rx) = bounded(0);
        thread::scope(|s| {
            let producer = s.spawn(|| tx.send(5));
            thread::sleep(Duration::from_millis(30));
            rx.close();
            assert!(matches!(producer.join().unwrap(), Err(SendError::Closed(5))));
        });
    }

    #[test]
    fn test_watch_is_notified_on_send_and_close() {
        let (tx, rx) = bounded(2);
        let notifier = Notifier::new();
        rx.watch(&notifier);
        tx.send(1).unwrap();
        assert_eq!(notifier.epoch(), 1);
        tx.close();
        assert_eq!(notifier.epoch(), 2);
    }

    #[test]
    fn test_multi_producer_multi_consumer() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 3;
        const PER_PRODUCER: usize = 1000;

        let (tx, rx) = bounded(10);
        let mut received = thread::scope(|s| {
            for p in 0..PRODUCERS {
                let tx = tx.clone();
                s.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        tx.send(p * PER_PRODUCER + i).unwrap();
                    }
                });
            }
            drop(tx);

            let consumers = (0..CONSUMERS)
                .map(|_| {
                    let rx = rx.clone();
                    s.spawn(move || rx.into_iter().collect::<Vec<_>>())
                })
                .collect::<Vec<_>>();
            consumers
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        received.sort();
        assert_eq!(received, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
    }
}

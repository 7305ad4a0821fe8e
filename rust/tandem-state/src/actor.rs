use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use tandem_common::{Error, Result};
use tandem_workflow::{
    bounded_queue::{Receiver, SendError, Sender, bounded},
    context::RuntimeContext,
    multiplex::{Event, Fired, wait_first},
    oneshot::{self, OneshotError, OneshotSender},
    signal::{CancellationToken, Deadline},
};

use crate::{KeyValueState, OpStats, StateKey, StateValue, stats::OpCounters};

enum Request<K, V> {
    Read {
        key: K,
        reply: OneshotSender<V>,
    },
    Write {
        key: K,
        value: V,
        reply: OneshotSender<()>,
    },
    Snapshot {
        reply: OneshotSender<HashMap<K, V>>,
    },
}

/// Map owned by a single thread and accessed through its mailbox.
///
/// Requests are served one at a time in the order they entered the mailbox. A request whose
/// caller timed out before the owner got to it is skipped, so a timed-out write never lands.
///
/// [`shutdown`](Self::shutdown) closes the mailbox, lets the owner serve what is already
/// queued, and joins it. Cancelling the token the actor was created with (or dropping the
/// actor) stops the owner without serving the queue. Either way, requests issued afterwards
/// fail with `Closed`.
pub struct StateActor<K, V> {
    mailbox: Sender<Request<K, V>>,
    counters: OpCounters,
    stop: CancellationToken,
    owner: Mutex<Option<JoinHandle<()>>>,
}

impl<K: StateKey, V: StateValue> StateActor<K, V> {
    /// Starts the owner thread with a mailbox of `mailbox_capacity` requests. A capacity of 0
    /// makes every request a rendezvous with the owner.
    pub fn spawn(mailbox_capacity: usize) -> Result<Arc<StateActor<K, V>>> {
        Self::with_token(mailbox_capacity, CancellationToken::new())
    }

    /// Starts an actor sized by the context's configuration, stopped on context shutdown.
    pub fn from_context(ctx: &RuntimeContext) -> Result<Arc<StateActor<K, V>>> {
        Self::with_token(ctx.config().actor_mailbox, ctx.child_token())
    }

    pub fn with_token(
        mailbox_capacity: usize,
        stop: CancellationToken,
    ) -> Result<Arc<StateActor<K, V>>> {
        let (mailbox, requests) = bounded(mailbox_capacity);
        let owner = {
            let stop = stop.clone();
            thread::Builder::new()
                .name("tandem-state-actor".to_string())
                .spawn(move || Self::run(requests, stop))
                .map_err(|e| Error::io("spawn state actor thread", e))?
        };
        log::debug!("state actor started with mailbox capacity {mailbox_capacity}");
        Ok(Arc::new(StateActor {
            mailbox,
            counters: OpCounters::default(),
            stop,
            owner: Mutex::new(Some(owner)),
        }))
    }

    fn run(requests: Receiver<Request<K, V>>, stop: CancellationToken) {
        let mut map = HashMap::new();
        let mut served = 0u64;
        loop {
            let events = [Event::Recv(&requests), Event::Cancel(&stop)];
            match wait_first(&events, None) {
                Ok(selected) => match selected.fired {
                    Fired::Received(request) => {
                        Self::serve(&mut map, request);
                        served += 1;
                    }
                    _ => break,
                },
                Err(_) => break,
            }
        }
        // Cancelled: whatever is still queued fails with `Closed` on the caller side.
        requests.close();
        let mut dropped = 0usize;
        while requests.try_recv().is_ok() {
            dropped += 1;
        }
        log::debug!("state actor stopped after {served} requests, {dropped} dropped");
    }

    fn serve(map: &mut HashMap<K, V>, request: Request<K, V>) {
        match request {
            Request::Read { key, reply } => {
                if reply.commit() {
                    let _ = reply.send(map.get(&key).cloned().unwrap_or_default());
                }
            }
            Request::Write { key, value, reply } => {
                if !reply.commit() {
                    log::trace!("skipping write abandoned by its caller");
                    return;
                }
                map.insert(key, value);
                let _ = reply.send(());
            }
            Request::Snapshot { reply } => {
                if reply.commit() {
                    let _ = reply.send(map.clone());
                }
            }
        }
    }

    fn call<R>(
        &self,
        operation: &str,
        deadline: Deadline,
        request: impl FnOnce(OneshotSender<R>) -> Request<K, V>,
    ) -> Result<R> {
        if deadline.is_expired() {
            return Err(Error::timed_out(operation));
        }
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send_until(request(reply), deadline)
            .map_err(|e| match e {
                SendError::TimedOut(_) => Error::timed_out(operation),
                _ => Error::closed("state actor"),
            })?;
        response.recv_until(deadline).map_err(|e| match e {
            OneshotError::TimedOut => Error::timed_out(operation),
            _ => Error::closed("state actor"),
        })
    }

    /// Closes the mailbox and waits for the owner to serve the remaining requests and exit.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.mailbox.close();
        if let Some(owner) = self.owner.lock().unwrap().take() {
            let _ = owner.join();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.mailbox.is_closed()
    }
}

impl<K: StateKey, V: StateValue> KeyValueState<K, V> for StateActor<K, V> {
    fn read_until(&self, key: &K, deadline: Deadline) -> Result<V> {
        let key = key.clone();
        let value = self.call("state read", deadline, |reply| Request::Read { key, reply })?;
        self.counters.record_read();
        Ok(value)
    }

    fn write_until(&self, key: K, value: V, deadline: Deadline) -> Result<()> {
        self.call("state write", deadline, |reply| Request::Write {
            key,
            value,
            reply,
        })?;
        self.counters.record_write();
        Ok(())
    }

    fn snapshot(&self) -> Result<HashMap<K, V>> {
        self.call("state snapshot", Deadline::never(), |reply| {
            Request::Snapshot { reply }
        })
    }

    fn stats(&self) -> OpStats {
        self.counters.snapshot()
    }
}

impl<K, V> Drop for StateActor<K, V> {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(owner) = self.owner.get_mut().ok().and_then(Option::take) {
            let _ = owner.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use tandem_common::Configuration;

    use super::*;

    #[test]
    fn test_requests_after_shutdown_are_closed() {
        let actor = StateActor::<u32, u32>::spawn(4).unwrap();
        actor.write(1, 10).unwrap();
        actor.shutdown();
        actor.shutdown();
        assert!(actor.is_shut_down());
        assert!(actor.read(&1).unwrap_err().is_closed());
        assert!(actor.write(1, 11).unwrap_err().is_closed());
    }

    #[test]
    fn test_expired_deadline_has_no_effect() {
        let actor = StateActor::<u32, u32>::spawn(0).unwrap();
        // An expired deadline is rejected before the request is sent.
        let err = actor
            .write_until(1, 1, Deadline::after(Duration::ZERO))
            .unwrap_err();
        assert!(err.is_timed_out());
        assert_eq!(actor.read(&1).unwrap(), 0);
        assert_eq!(actor.stats(), OpStats { reads: 1, writes: 0 });
    }

    #[test]
    fn test_snapshot_reflects_acknowledged_writes() {
        let actor = StateActor::<String, u64>::spawn(0).unwrap();
        actor.write("a".to_string(), 1).unwrap();
        actor.write("b".to_string(), 2).unwrap();
        actor.write("a".to_string(), 3).unwrap();
        let snapshot = actor.snapshot().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a"], 3);
        assert_eq!(snapshot["b"], 2);
    }

    #[test]
    fn test_context_shutdown_stops_owner() {
        let ctx = RuntimeContext::new(Configuration::default().with_actor_mailbox(2)).unwrap();
        let actor = StateActor::<u8, u8>::from_context(&ctx).unwrap();
        actor.write(1, 1).unwrap();
        ctx.shutdown();
        let start = Instant::now();
        loop {
            match actor.read(&1) {
                Err(e) if e.is_closed() => break,
                _ => assert!(start.elapsed() < Duration::from_secs(5)),
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

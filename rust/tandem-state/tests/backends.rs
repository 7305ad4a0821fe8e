use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use tandem_state::{KeyValueState, LockedState, OpStats, StateActor};
use tandem_workflow::signal::Deadline;

type SharedState = Arc<dyn KeyValueState<u64, u64>>;

fn backends() -> Vec<(&'static str, SharedState)> {
    let actor: SharedState = StateActor::<u64, u64>::spawn(0).unwrap();
    let buffered: SharedState = StateActor::<u64, u64>::spawn(16).unwrap();
    let locked: SharedState = Arc::new(LockedState::<u64, u64>::new());
    vec![("actor", actor), ("actor-buffered", buffered), ("locked", locked)]
}

#[test]
fn test_absent_key_reads_default() {
    for (name, state) in backends() {
        assert_eq!(state.read(&42).unwrap(), 0, "{name}");
        assert_eq!(state.stats(), OpStats { reads: 1, writes: 0 }, "{name}");
    }
}

#[test]
fn test_concurrent_writers_same_key() {
    const WRITERS: u64 = 10;
    const WRITES: u64 = 100;

    for (name, state) in backends() {
        thread::scope(|s| {
            for w in 0..WRITERS {
                let state = &state;
                s.spawn(move || {
                    for i in 0..WRITES {
                        state.write(0, w * WRITES + i).unwrap();
                    }
                });
            }
        });

        let last = state.read(&0).unwrap();
        let writer = last / WRITES;
        assert!(writer < WRITERS, "{name}: {last}");
        // Each writer's final write is the last value it can leave behind.
        assert_eq!(last % WRITES, WRITES - 1, "{name}: {last}");
        assert_eq!(
            state.stats(),
            OpStats {
                reads: 1,
                writes: WRITERS * WRITES
            },
            "{name}"
        );
    }
}

#[test]
fn test_acknowledged_write_is_visible() {
    for (name, state) in backends() {
        for i in 0..50 {
            let key = fastrand::u64(..8);
            state.write(key, i).unwrap();
            assert_eq!(state.read(&key).unwrap(), i, "{name}");
        }
    }
}

#[test]
fn test_readers_never_observe_torn_values() {
    for (name, state) in backends() {
        let stop = AtomicBool::new(false);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        let v = state.read(&7).unwrap();
                        // Writers only store values with both halves equal.
                        assert_eq!(v >> 32, v & 0xffff_ffff, "{name}");
                    }
                });
            }
            for _ in 0..2 {
                s.spawn(|| {
                    for i in 0..200u64 {
                        state.write(7, (i << 32) | i).unwrap();
                    }
                });
            }
            thread::sleep(Duration::from_millis(50));
            stop.store(true, Ordering::Relaxed);
        });
        assert!(state.stats().writes >= 400, "{name}");
    }
}

#[test]
fn test_snapshot_matches_reads() {
    for (name, state) in backends() {
        for k in 0..10 {
            state.write(k, k * k).unwrap();
        }
        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.len(), 10, "{name}");
        for k in 0..10 {
            assert_eq!(snapshot[&k], state.read(&k).unwrap(), "{name}");
        }
    }
}

#[test]
fn test_deadline_bounded_operations_succeed_in_time() {
    for (name, state) in backends() {
        let deadline = Deadline::after(Duration::from_secs(5));
        state.write_until(3, 9, deadline).unwrap();
        assert_eq!(state.read_until(&3, deadline).unwrap(), 9, "{name}");
    }
}

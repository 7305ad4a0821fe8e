use std::{collections::HashMap, sync::Mutex, time::Instant};

use tandem_common::{Error, Result};
use tandem_workflow::signal::Deadline;

use crate::{KeyValueState, OpStats, StateKey, StateValue, stats::OpCounters};

/// Mutex-guarded map.
///
/// The lock is held only while the map itself is touched; counters are updated outside of
/// it. Mutex acquisition is not interruptible, so the deadline is checked before locking:
/// an operation that starts in time always completes.
pub struct LockedState<K, V> {
    map: Mutex<HashMap<K, V>>,
    counters: OpCounters,
}

impl<K: StateKey, V: StateValue> LockedState<K, V> {
    pub fn new() -> LockedState<K, V> {
        LockedState {
            map: Mutex::new(HashMap::new()),
            counters: OpCounters::default(),
        }
    }

    fn check_deadline(deadline: Deadline, operation: &str) -> Result<()> {
        if deadline.has_passed(Instant::now()) {
            return Err(Error::timed_out(operation));
        }
        Ok(())
    }
}

impl<K: StateKey, V: StateValue> Default for LockedState<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StateKey, V: StateValue> KeyValueState<K, V> for LockedState<K, V> {
    fn read_until(&self, key: &K, deadline: Deadline) -> Result<V> {
        Self::check_deadline(deadline, "state read")?;
        let value = self.map.lock().unwrap().get(key).cloned();
        self.counters.record_read();
        Ok(value.unwrap_or_default())
    }

    fn write_until(&self, key: K, value: V, deadline: Deadline) -> Result<()> {
        Self::check_deadline(deadline, "state write")?;
        self.map.lock().unwrap().insert(key, value);
        self.counters.record_write();
        Ok(())
    }

    fn snapshot(&self) -> Result<HashMap<K, V>> {
        Ok(self.map.lock().unwrap().clone())
    }

    fn stats(&self) -> OpStats {
        self.counters.snapshot()
    }
}

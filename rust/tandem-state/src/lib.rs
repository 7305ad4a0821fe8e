//! Shared key-value state with two interchangeable concurrency strategies.
//!
//! - [`StateActor`]: a single owner thread holds the map; every access is a message sent to
//!   it, so operations are serialized in arrival order.
//! - [`LockedState`]: the map sits behind a mutex held only for the duration of one access,
//!   with lock-free operation counters next to it.
//!
//! Both implement [`KeyValueState`] and are observably equivalent for the read/write
//! contract: reading an absent key yields `V::default()`, and a read issued after a write
//! was acknowledged observes that write (or a later one).

mod actor;
mod locked;
mod stats;

use std::{collections::HashMap, hash::Hash};

use tandem_common::Result;
use tandem_workflow::signal::Deadline;

pub use actor::StateActor;
pub use locked::LockedState;
pub use stats::OpStats;

/// Key bound shared by both backends.
pub trait StateKey: Eq + Hash + Clone + Send + 'static {}

impl<K: Eq + Hash + Clone + Send + 'static> StateKey for K {}

/// Value bound shared by both backends.
pub trait StateValue: Clone + Default + Send + 'static {}

impl<V: Clone + Default + Send + 'static> StateValue for V {}

/// Concurrent map access.
pub trait KeyValueState<K: StateKey, V: StateValue>: Send + Sync {
    /// Reads `key`, returning `V::default()` if it was never written.
    ///
    /// Fails with `TimedOut` if the deadline passes first; a timed-out read has no effect.
    fn read_until(&self, key: &K, deadline: Deadline) -> Result<V>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Fails with `TimedOut` if the deadline passes first, in which case the map is left
    /// unchanged.
    fn write_until(&self, key: K, value: V, deadline: Deadline) -> Result<()>;

    /// A point-in-time copy of the whole map.
    fn snapshot(&self) -> Result<HashMap<K, V>>;

    /// Completed read and write counts.
    fn stats(&self) -> OpStats;

    fn read(&self, key: &K) -> Result<V> {
        self.read_until(key, Deadline::never())
    }

    fn write(&self, key: K, value: V) -> Result<()> {
        self.write_until(key, value, Deadline::never())
    }
}

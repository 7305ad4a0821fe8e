//! State command implementation

use std::{collections::BTreeMap, sync::Arc, thread, time::Duration};

use anyhow::{Result, anyhow};
use serde::Serialize;
use tandem_common::Configuration;
use tandem_state::{KeyValueState, LockedState, StateActor};
use tandem_workflow::signal::{CancellationToken, Deadline};

use crate::Backend;

const KEY_SPACE: u64 = 5;

/// What a state run did, printed as JSON.
#[derive(Debug, Serialize)]
pub struct StateSummary {
    pub backend: String,
    pub readers: usize,
    pub writers: usize,
    pub duration_ms: u64,
    pub reads: u64,
    pub writes: u64,
    pub state: BTreeMap<u64, u64>,
}

pub fn run(
    config: Configuration,
    backend: Backend,
    readers: usize,
    writers: usize,
    duration_ms: u64,
) -> Result<()> {
    let summary = execute(config, backend, readers, writers, duration_ms)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Runs `readers` and `writers` threads against the chosen backend for `duration_ms`.
///
/// Each thread touches a random key out of a small key space, pausing a millisecond
/// between operations.
pub fn execute(
    config: Configuration,
    backend: Backend,
    readers: usize,
    writers: usize,
    duration_ms: u64,
) -> Result<StateSummary> {
    let actor = match backend {
        Backend::Actor => Some(StateActor::<u64, u64>::spawn(config.actor_mailbox)?),
        Backend::Locked => None,
    };
    let state: Arc<dyn KeyValueState<u64, u64>> = match &actor {
        Some(actor) => actor.clone(),
        None => Arc::new(LockedState::<u64, u64>::new()),
    };

    let stop = CancellationToken::new();
    thread::scope(|s| -> Result<()> {
        let mut handles = Vec::with_capacity(readers + writers);
        for _ in 0..readers {
            handles.push(s.spawn(|| -> Result<()> {
                while !stop.is_cancelled() {
                    state.read(&fastrand::u64(0..KEY_SPACE))?;
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            }));
        }
        for _ in 0..writers {
            handles.push(s.spawn(|| -> Result<()> {
                while !stop.is_cancelled() {
                    state.write(fastrand::u64(0..KEY_SPACE), fastrand::u64(0..100))?;
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            }));
        }

        thread::sleep(Duration::from_millis(duration_ms));
        stop.cancel();
        log::debug!("Stopping {} state clients", handles.len());
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("State client thread panicked"))??;
        }
        Ok(())
    })?;

    let stats = state.stats();
    let snapshot = state.snapshot()?.into_iter().collect::<BTreeMap<_, _>>();
    if let Some(actor) = actor {
        actor.shutdown();
    }

    Ok(StateSummary {
        backend: format!("{backend:?}").to_lowercase(),
        readers,
        writers,
        duration_ms,
        reads: stats.reads,
        writes: stats.writes,
        state: snapshot,
    })
}

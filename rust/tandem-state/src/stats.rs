use std::sync::atomic::{AtomicU64, Ordering};

/// Completed operation counts of a state backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub reads: u64,
    pub writes: u64,
}

impl OpStats {
    pub fn total(&self) -> u64 {
        self.reads + self.writes
    }
}

/// Lock-free counters behind [`OpStats`].
#[derive(Debug, Default)]
pub(crate) struct OpCounters {
    reads: AtomicU64,
    writes: AtomicU64,
}

impl OpCounters {
    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> OpStats {
        OpStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

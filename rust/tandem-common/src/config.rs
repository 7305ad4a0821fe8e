//! Runtime configuration shared by the worker pool, the rate limiter and the state actor.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sizing and pacing parameters for a tandem runtime.
///
/// Durations are (de)serialized as integer milliseconds, so a configuration file looks like:
///
/// ```json
/// {
///     "worker_count": 3,
///     "bucket_capacity": 3,
///     "refill_interval_ms": 200,
///     "queue_capacity": 100
/// }
/// ```
///
/// Fields missing from the input fall back to [`Configuration::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Number of concurrent workers in the pool. Must be greater than 0.
    pub worker_count: usize,
    /// Token bucket capacity, i.e. the largest burst the rate limiter admits. Must be at least 1.
    pub bucket_capacity: usize,
    /// Interval between two token refills. Must be non-zero.
    #[serde(rename = "refill_interval_ms", with = "millis")]
    pub refill_interval: Duration,
    /// Capacity of the job submission queue; 0 makes submission a rendezvous with a worker.
    pub queue_capacity: usize,
    /// Capacity of the result queue; 0 makes publication a rendezvous with the reader.
    pub result_capacity: usize,
    /// Deadline handed to each handler invocation, measured from the moment a worker picks
    /// the job up.
    #[serde(rename = "job_timeout_ms", with = "opt_millis")]
    pub job_timeout: Option<Duration>,
    /// Capacity of the state actor's request mailbox; 0 is a rendezvous.
    pub actor_mailbox: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            worker_count: 3,
            bucket_capacity: 3,
            refill_interval: Duration::from_millis(200),
            queue_capacity: 100,
            result_capacity: 100,
            job_timeout: None,
            actor_mailbox: 0,
        }
    }
}

impl Configuration {
    /// Checks every field constraint, reporting the first violation as `InvalidArgument`.
    pub fn validate(&self) -> Result<()> {
        crate::verify_arg!(worker_count, self.worker_count > 0);
        crate::verify_arg!(bucket_capacity, self.bucket_capacity >= 1);
        crate::verify_arg!(refill_interval, !self.refill_interval.is_zero());
        if let Some(timeout) = self.job_timeout {
            crate::verify_arg!(job_timeout, !timeout.is_zero());
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Configuration> {
        let config: Configuration = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Configuration> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_bucket(mut self, capacity: usize, refill_interval: Duration) -> Self {
        self.bucket_capacity = capacity;
        self.refill_interval = refill_interval;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_result_capacity(mut self, result_capacity: usize) -> Self {
        self.result_capacity = result_capacity;
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Option<Duration>) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_actor_mailbox(mut self, actor_mailbox: usize) -> Self {
        self.actor_mailbox = actor_mailbox;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}

//! Pool command implementation

use std::time::Duration;

use anyhow::{Context, Result};
use tandem_common::Configuration;
use tandem_pool::{Job, JobContext, JobId, WorkerPool};

/// One finished job as reported by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOutcome {
    pub job_id: JobId,
    pub worker: usize,
    pub value: u64,
}

pub fn run(
    config: Configuration,
    jobs: u64,
    workers: Option<usize>,
    max_delay_ms: u64,
) -> Result<()> {
    let outcomes = execute(config, jobs, workers, max_delay_ms)?;
    println!("{} jobs finished", outcomes.len());
    Ok(())
}

/// Doubles `1..=jobs` on the pool, each job sleeping up to `max_delay_ms`.
pub fn execute(
    config: Configuration,
    jobs: u64,
    workers: Option<usize>,
    max_delay_ms: u64,
) -> Result<Vec<PoolOutcome>> {
    let config = match workers {
        Some(workers) => config.with_worker_count(workers),
        None => config,
    };
    let pool = WorkerPool::with_context(&config, move |ctx: &JobContext, x: u64| {
        println!("worker {} started  job {}", ctx.worker(), ctx.job_id());
        std::thread::sleep(Duration::from_millis(fastrand::u64(0..=max_delay_ms)));
        println!("worker {} finished job {}", ctx.worker(), ctx.job_id());
        Ok::<_, String>((ctx.worker(), x * 2))
    })
    .context("Failed to start the worker pool")?;
    let results = pool.results()?;

    let outcomes = std::thread::scope(|s| -> Result<Vec<PoolOutcome>> {
        let producer = s.spawn(|| -> Result<()> {
            let submitted = (1..=jobs).try_for_each(|x| {
                pool.submit(Job::new(x, x))
                    .with_context(|| format!("Failed to submit job {x}"))
            });
            pool.close();
            submitted
        });

        let mut outcomes = Vec::with_capacity(jobs as usize);
        for result in results {
            let result = result?;
            match &result.outcome {
                Ok((worker, value)) => {
                    println!("result of job {}: {value}", result.job_id);
                    outcomes.push(PoolOutcome {
                        job_id: result.job_id,
                        worker: *worker,
                        value: *value,
                    });
                }
                Err(e) => println!("job {} failed: {e}", result.job_id),
            }
        }
        producer
            .join()
            .map_err(|_| anyhow::anyhow!("Job producer panicked"))??;
        Ok(outcomes)
    })?;
    pool.join()?;
    Ok(outcomes)
}

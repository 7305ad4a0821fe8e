use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(name = "tandem-cmd")]
#[command(about = "Command-line driver for the tandem worker pool, rate limiter and state")]
#[command(version)]
struct Cli {
    /// JSON configuration file providing defaults for every subcommand
    #[arg(long, global = true)]
    config: Option<String>,

    /// Increase log verbosity (-v for debug, -vv for trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run jobs through a worker pool and print every result
    Pool {
        /// Number of jobs to submit
        #[arg(long, default_value_t = 5)]
        jobs: u64,

        /// Number of workers (defaults to the configuration's worker_count)
        #[arg(long)]
        workers: Option<usize>,

        /// Upper bound of the simulated per-job processing time
        #[arg(long, default_value_t = 1000)]
        max_delay_ms: u64,
    },

    /// Pace requests through a token bucket and print when each was granted
    Limit {
        /// Number of requests to issue
        #[arg(long, default_value_t = 10)]
        requests: usize,

        /// Bucket capacity (defaults to the configuration's bucket_capacity)
        #[arg(long)]
        burst: Option<usize>,

        /// Refill interval (defaults to the configuration's refill_interval_ms)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Hammer shared state with concurrent readers and writers and print the op counts
    State {
        /// Which state backend to use
        #[arg(long, value_enum, default_value_t = Backend::Actor)]
        backend: Backend,

        /// Number of reader threads
        #[arg(long, default_value_t = 100)]
        readers: usize,

        /// Number of writer threads
        #[arg(long, default_value_t = 10)]
        writers: usize,

        /// How long to run
        #[arg(long, default_value_t = 1000)]
        duration_ms: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Single owner thread serving requests from a mailbox
    Actor,
    /// Mutex-guarded map with atomic counters
    Locked,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Pool {
            jobs,
            workers,
            max_delay_ms,
        } => commands::pool::run(config, jobs, workers, max_delay_ms),
        Commands::Limit {
            requests,
            burst,
            interval_ms,
        } => commands::limit::run(config, requests, burst, interval_ms),
        Commands::State {
            backend,
            readers,
            writers,
            duration_ms,
        } => commands::state::run(config, backend, readers, writers, duration_ms),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

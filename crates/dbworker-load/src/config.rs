use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use dbworker::PoolConfig;

/// Runtime configuration for the `dbworker-load` binary.
///
/// These settings size the worker pool under test and shape the traffic that
/// is pushed through it. All values are parsed from CLI arguments or
/// environment variables (optionally loaded from a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dbworker-load",
    version,
    about = "Drives a dbworker pool with concurrent document reads and writes"
)]
pub struct CliArgs {
    /// Number of worker threads in the pool, i.e. the maximum number of
    /// operations issued against the database at once.
    ///
    /// Defaults to the number of logical CPUs.
    ///
    /// Environment variable: `DBWORKER_WORKERS`
    #[arg(long, env = "DBWORKER_WORKERS")]
    pub workers: Option<usize>,

    /// Queue slots per worker. The queue capacity is this value times the
    /// number of workers.
    ///
    /// Environment variable: `DBWORKER_QUEUE_LEN_PER_WORKER`
    #[arg(
        long,
        env = "DBWORKER_QUEUE_LEN_PER_WORKER",
        default_value_t = PoolConfig::DEFAULT_QUEUE_LEN_PER_WORKER
    )]
    pub queue_len_per_worker: usize,

    /// Name of the in-memory database to connect to.
    ///
    /// Environment variable: `DBWORKER_DATABASE`
    #[arg(long, env = "DBWORKER_DATABASE", default_value_t = String::from("dbworker-load"))]
    pub database: String,

    /// Total number of requests to submit before stopping.
    ///
    /// Environment variable: `DBWORKER_REQUESTS`
    #[arg(long, env = "DBWORKER_REQUESTS", default_value_t = 100_000)]
    pub requests: u64,

    /// Number of concurrent submitting tasks. Values above the worker count
    /// plus the queue capacity exercise backpressure.
    ///
    /// Environment variable: `DBWORKER_CONCURRENCY`
    #[arg(long, env = "DBWORKER_CONCURRENCY", default_value_t = 64)]
    pub concurrency: usize,

    /// Fraction of requests that read a previously written document instead
    /// of inserting a new one.
    ///
    /// Environment variable: `DBWORKER_READ_RATIO`
    #[arg(long, env = "DBWORKER_READ_RATIO", default_value_t = 0.5)]
    pub read_ratio: f64,

    /// Fraction of requests whose work item panics, to exercise the fault
    /// boundary under load.
    ///
    /// Environment variable: `DBWORKER_FAULT_RATE`
    #[arg(long, env = "DBWORKER_FAULT_RATE", default_value_t = 0.0)]
    pub fault_rate: f64,

    /// How often the queue length is sampled, in milliseconds.
    ///
    /// Environment variable: `DBWORKER_SAMPLE_INTERVAL_MS`
    #[arg(long, env = "DBWORKER_SAMPLE_INTERVAL_MS", default_value_t = 250)]
    pub sample_interval_ms: u64,

    /// Log output format.
    ///
    /// Environment variable: `DBWORKER_LOG_FORMAT`
    #[arg(long, env = "DBWORKER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub pool: PoolConfig,
    pub database: String,
    pub requests: u64,
    pub concurrency: usize,
    pub read_ratio: f64,
    pub fault_rate: f64,
    pub sample_interval: Duration,
    pub log_format: LogFormat,
}

fn check_ratio(name: &str, value: f64) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{name} must be between 0 and 1, got {value}");
    }
    Ok(())
}

impl TryFrom<CliArgs> for LoadConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let workers = args.workers.unwrap_or_else(num_cpus::get);

        if workers == 0 {
            bail!("DBWORKER_WORKERS must be greater than 0");
        }
        if args.queue_len_per_worker == 0 {
            bail!("DBWORKER_QUEUE_LEN_PER_WORKER must be greater than 0");
        }
        if args.concurrency == 0 {
            bail!("DBWORKER_CONCURRENCY must be greater than 0");
        }
        if args.sample_interval_ms == 0 {
            bail!("DBWORKER_SAMPLE_INTERVAL_MS must be greater than 0");
        }
        check_ratio("DBWORKER_READ_RATIO", args.read_ratio)?;
        check_ratio("DBWORKER_FAULT_RATE", args.fault_rate)?;

        let pool = PoolConfig::per_worker(workers, args.queue_len_per_worker)?;

        Ok(Self {
            pool,
            database: args.database,
            requests: args.requests,
            concurrency: args.concurrency,
            read_ratio: args.read_ratio,
            fault_rate: args.fault_rate,
            sample_interval: Duration::from_millis(args.sample_interval_ms),
            log_format: args.log_format,
        })
    }
}

//! zdb-sync
//!
//! Replicates 0-db namespaces from a master onto a slave, either as a one-shot
//! bulk copy or by tailing the master record by record.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zdb_sync::sync::{Phase, human_size};
use zdb_sync::{
    ConnectionSettings, Endpoint, LogFormat, LogObserver, PollConfig, ProgressObserver,
    ProgressReport, RedisTransport, RetryPolicy, StopSignal, Strategy, SyncConfig, SyncOptions,
    SyncOutcome, SyncResult, SyncSession, Target, ZdbClient, establish, stop_signal, with_retry,
};

#[derive(Parser)]
#[command(name = "zdb-sync")]
#[command(about = "Master/slave replication for 0-db namespaces", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy whole segments up to the current master position
    Bulk {
        #[command(flatten)]
        pair: PairArgs,

        /// Leave the slave frozen once the copy completes
        #[arg(long)]
        keep_frozen: bool,
    },

    /// Tail the master record by record until interrupted
    Incremental {
        #[command(flatten)]
        pair: PairArgs,
    },

    /// Run every session of a configuration file
    Run {
        /// Path to the YAML configuration
        #[arg(short, long, default_value = "zdb-sync.yml")]
        config: PathBuf,
    },

    /// Show the cursor and size of a namespace
    Info {
        /// Endpoint (host:port or unix:/path)
        #[arg(short, long, default_value = "127.0.0.1:9900")]
        endpoint: Endpoint,

        #[arg(short, long)]
        password: Option<String>,

        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct PairArgs {
    /// Master endpoint (host:port or unix:/path)
    #[arg(long, default_value = "127.0.0.1:9900")]
    master: Endpoint,

    #[arg(long)]
    master_password: Option<String>,

    /// Slave endpoint (host:port or unix:/path)
    #[arg(long)]
    slave: Endpoint,

    #[arg(long)]
    slave_password: Option<String>,

    /// Namespace replicated on both sides
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Idle poll interval in milliseconds
    #[arg(long, default_value_t = 10_000)]
    poll_interval_ms: u64,

    /// Consecutive reconnect attempts before giving up
    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    /// Log progress lines instead of drawing a progress bar
    #[arg(long)]
    no_progress: bool,
}

impl PairArgs {
    fn targets(&self) -> (Target, Target) {
        let master = Target::new(self.master.clone(), &self.namespace, "master");
        let slave = Target::new(self.slave.clone(), &self.namespace, "slave");
        (
            with_password(master, &self.master_password),
            with_password(slave, &self.slave_password),
        )
    }

    fn options(&self) -> SyncOptions {
        SyncOptions {
            poll: PollConfig {
                interval_ms: self.poll_interval_ms,
                ..Default::default()
            },
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn with_password(target: Target, password: &Option<String>) -> Target {
    match password {
        Some(password) => target.with_password(password.clone()),
        None => target,
    }
}

/// One session to start
struct Job {
    name: String,
    strategy: Strategy,
    master: Target,
    slave: Target,
    options: SyncOptions,
}

impl Job {
    fn from_pair(strategy: Strategy, pair: &PairArgs) -> Self {
        let (master, slave) = pair.targets();
        Self {
            name: pair.namespace.clone(),
            strategy,
            master,
            slave,
            options: pair.options(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Run { config } => Some(
            SyncConfig::from_file(config)
                .with_context(|| format!("Failed to load {}", config.display()))?,
        ),
        _ => None,
    };

    // Initialize logging
    let (level, format) = match &config {
        Some(config) => (config.logging.level.clone(), config.logging.format),
        None => ("info".to_string(), LogFormat::Text),
    };
    let level = if cli.verbose { "debug".to_string() } else { level };
    let format = if cli.log_json { LogFormat::Json } else { format };
    init_logging(&level, format);

    info!("zdb-sync v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Bulk { pair, keep_frozen } => {
            let mut job = Job::from_pair(Strategy::Bulk, &pair);
            job.options.bulk.unfreeze_on_completion = !keep_frozen;
            run_jobs(vec![job], ConnectionSettings::default(), !pair.no_progress).await?;
        }

        Commands::Incremental { pair } => {
            let job = Job::from_pair(Strategy::Incremental, &pair);
            run_jobs(vec![job], ConnectionSettings::default(), !pair.no_progress).await?;
        }

        Commands::Run { .. } => {
            let Some(config) = config else {
                bail!("configuration not loaded");
            };

            let options = config.options();
            let jobs = config
                .sessions
                .iter()
                .map(|session| Job {
                    name: session.name.clone(),
                    strategy: session.strategy,
                    master: session.master_target(),
                    slave: session.slave_target(),
                    options: options.clone(),
                })
                .collect();

            let progress = format == LogFormat::Text;
            run_jobs(jobs, config.connection, progress).await?;
        }

        Commands::Info {
            endpoint,
            password,
            namespace,
            json,
        } => {
            let target = with_password(Target::new(endpoint, &namespace, "target"), &password);
            let mut client = open(target, ConnectionSettings::default()).await?;

            let snapshot = client
                .namespace_info(&namespace)
                .await
                .with_context(|| format!("Failed to read namespace {}", namespace))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("namespace: {}", namespace);
                println!("position:  {}", snapshot.position);
                println!(
                    "size:      {} ({} bytes)",
                    human_size(snapshot.size_bytes),
                    snapshot.size_bytes
                );
            }
        }
    }

    Ok(())
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Connect and log in
async fn connect(target: Target, settings: ConnectionSettings) -> SyncResult<ZdbClient<RedisTransport>> {
    let mut client = ZdbClient::connect(target, settings).await?;
    establish(&mut client).await?;
    Ok(client)
}

async fn open(target: Target, settings: ConnectionSettings) -> Result<ZdbClient<RedisTransport>> {
    connect(target.clone(), settings)
        .await
        .with_context(|| format!("Failed to open {}", target))
}

/// Reject every job before any session starts
fn validate_jobs(jobs: &[Job]) -> Result<()> {
    for job in jobs {
        job.options
            .validate()
            .with_context(|| format!("Invalid options for session {}", job.name))?;
    }
    Ok(())
}

async fn run_jobs(jobs: Vec<Job>, settings: ConnectionSettings, progress: bool) -> Result<()> {
    validate_jobs(&jobs)?;

    let (handle, stop) = stop_signal();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping sessions");
            handle.stop();
        }
    });

    let bars = MultiProgress::new();
    let mut tasks = JoinSet::new();

    for job in jobs {
        let observer: Box<dyn ProgressObserver> = if progress {
            Box::new(BarObserver::new(bars.add(ProgressBar::new(0)), &job.name)?)
        } else {
            Box::new(LogObserver::default())
        };

        let name = job.name.clone();
        let stop = stop.clone();
        tasks.spawn(async move { (name, run_job(job, settings, observer, stop).await) });
    }

    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(outcome))) => info!("Session {} ended: {:?}", name, outcome),
            Ok((name, Err(e))) => {
                error!("Session {} failed: {:#}", name, e);
                failed += 1;
            }
            Err(e) => {
                error!("Session task failed: {}", e);
                failed += 1;
            }
        }
    }

    interrupt.abort();

    if failed > 0 {
        bail!("{} session(s) failed", failed);
    }

    Ok(())
}

/// Connect both sides under the retry policy, then run the session
async fn run_job(
    job: Job,
    settings: ConnectionSettings,
    observer: Box<dyn ProgressObserver>,
    mut stop: StopSignal,
) -> Result<SyncOutcome> {
    let retry = job.options.retry;

    let master = with_retry(&retry, &mut stop, &job.master.to_string(), || {
        connect(job.master.clone(), settings)
    })
    .await
    .with_context(|| format!("Failed to open {}", job.master))?;
    let Some(master) = master else {
        return Ok(SyncOutcome::Stopped);
    };

    let slave = with_retry(&retry, &mut stop, &job.slave.to_string(), || {
        connect(job.slave.clone(), settings)
    })
    .await
    .with_context(|| format!("Failed to open {}", job.slave))?;
    let Some(slave) = slave else {
        return Ok(SyncOutcome::Stopped);
    };

    let mut session = SyncSession::new(job.name, job.strategy, master, slave, job.options)?
        .with_stop(stop)
        .with_observer(observer);

    Ok(session.run().await?)
}

/// Draws progress as an indicatif bar sized in bytes
struct BarObserver {
    bar: ProgressBar,
}

impl BarObserver {
    fn new(bar: ProgressBar, name: &str) -> Result<Self> {
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {prefix} {bar:40.cyan/blue} {percent:>3}% {msg}")?
                .progress_chars("=>-"),
        );
        bar.set_prefix(name.to_string());
        Ok(Self { bar })
    }
}

impl ProgressObserver for BarObserver {
    fn on_progress(&mut self, report: &ProgressReport) {
        let total = report.total_bytes.max(1);
        self.bar.set_length(total);
        self.bar.set_position(report.synced_bytes.min(total));

        let message = format!(
            "{} / {}, {}/s, at {} [master {}]",
            human_size(report.synced_bytes),
            human_size(report.total_bytes),
            human_size(report.bytes_per_sec as u64),
            report.slave,
            report.master
        );

        match report.phase {
            Phase::Syncing => self.bar.set_message(message),
            Phase::Waiting => self.bar.set_message(format!("waiting, {}", message)),
            Phase::Finished => self.bar.finish_with_message(format!("done, {}", message)),
        }
    }
}

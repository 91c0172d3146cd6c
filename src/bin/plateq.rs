//! plateq CLI: fill the ledger, drain it, and look after it.

use anyhow::Context as _;
use clap::{ArgGroup, Args, Parser, Subcommand};
use plateq::config::{Config, RunConfig};
use plateq::db::Db;
use plateq::generator::{self, Source};
use plateq::ledger::Ledger;
use plateq::lookup::citypay::DEFAULT_ENDPOINT;
use plateq::lookup::{CityPayLookup, Lookup};
use plateq::monitor::Monitor;
use plateq::pool::{Feed, WorkerPool};
use plateq::producer::Producer;
use plateq::queue::WorkQueue;
use plateq::sink;
use plateq::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "plateq", about = "Bulk license-plate lookups over a durable status ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Flags shared by add-work and do-work. Unset flags keep the config file value.
#[derive(Args)]
struct RunArgs {
    /// Jurisdiction (plate state) of every identifier in this run
    #[arg(long)]
    jurisdiction: Option<String>,
    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,
    /// Records per transaction (0 writes each record on its own)
    #[arg(long)]
    tx_size: Option<usize>,
    /// TOML file with run parameters
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Add identifiers to the ledger as pending work
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .args(["from", "plates_file", "plates_csv_file"])
    ))]
    AddWork {
        /// Lower template of a character range, e.g. AA000
        #[arg(long, requires = "to")]
        from: Option<String>,
        /// Upper template of a character range, e.g. ZZ999
        #[arg(long, requires = "from")]
        to: Option<String>,
        /// File with one plate per line
        #[arg(long)]
        plates_file: Option<PathBuf>,
        /// Delimited file with plates in one column
        #[arg(long)]
        plates_csv_file: Option<PathBuf>,
        /// Zero-based column index for --plates-csv-file
        #[arg(long, default_value_t = 0)]
        csv_column: usize,
        /// Field delimiter for --plates-csv-file
        #[arg(long, default_value_t = ',')]
        csv_delimiter: char,
        /// Skip the first row of the input file
        #[arg(long)]
        csv_skip_first: bool,
        /// Provenance label stored on new records
        #[arg(long)]
        tag: Option<String>,
        /// Log what would be added without writing
        #[arg(long)]
        dry_run: bool,
        /// Batched inserts skip the existence check
        #[arg(long)]
        skip_existing_check: bool,
        /// Skip identifiers already done in the ledger
        #[arg(long)]
        dedup_done: bool,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Look up pending plates and record the results
    DoWork {
        /// Comma-separated plates to process instead of draining the ledger
        #[arg(long, value_delimiter = ',', conflicts_with = "plates_file")]
        plates: Vec<String>,
        /// File with one plate per line to process instead of draining the ledger
        #[arg(long)]
        plates_file: Option<PathBuf>,
        /// Stop each worker after this many successful lookups
        #[arg(long)]
        work_limit: Option<usize>,
        /// Do not log ledger progress while working
        #[arg(long)]
        no_monitor: bool,
        /// Lookup endpoint
        #[arg(long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
        /// Per-request lookup timeout in seconds
        #[arg(long, default_value_t = 30)]
        lookup_timeout: u64,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Delete every record with the sentinel identifier
    Cleanup {
        #[arg(long, default_value = "0")]
        sentinel: String,
    },
    /// Move errored records back to pending
    Requeue {
        #[arg(long, default_value = "NY")]
        jurisdiction: String,
    },
    /// Print record counts per state
    Status {
        /// Only count one jurisdiction
        #[arg(long)]
        jurisdiction: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Log ledger progress until interrupted
    Monitor {
        #[arg(long)]
        jurisdiction: Option<String>,
        /// Seconds between samples
        #[arg(long, default_value_t = 10)]
        interval: u64,
    },
    /// Look up a single plate and print the amount owed
    Lookup {
        plate: String,
        #[arg(long, default_value = "NY")]
        jurisdiction: String,
        #[arg(long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
        #[arg(long, default_value_t = 30)]
        lookup_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env();
    let _guard = init_telemetry(telemetry_config(config.as_ref().ok()))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            on_interrupt.cancel();
        }
    });

    let span = tracing::info_span!("plateq", run_id = %Uuid::new_v4());
    dispatch(cli.command, config, cancel).instrument(span).await
}

async fn dispatch(
    command: Command,
    config: plateq::error::Result<Config>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Command::AddWork {
            from,
            to,
            plates_file,
            plates_csv_file,
            csv_column,
            csv_delimiter,
            csv_skip_first,
            tag,
            dry_run,
            skip_existing_check,
            dedup_done,
            run,
        } => {
            let source = match (from, to, plates_file, plates_csv_file) {
                (Some(from), Some(to), _, _) => Source::Range { from, to },
                (_, _, Some(path), _) => Source::Lines {
                    path,
                    skip_header: csv_skip_first,
                },
                (_, _, _, Some(path)) => Source::Table {
                    path,
                    column: csv_column,
                    skip_header: csv_skip_first,
                    delimiter: u8::try_from(csv_delimiter)
                        .context("--csv-delimiter must be a single-byte character")?,
                },
                _ => anyhow::bail!(
                    "one of --from/--to, --plates-file or --plates-csv-file is required"
                ),
            };
            let mut run = run_config(run)?;
            if tag.is_some() {
                run.tag = tag;
            }
            run.dry_run |= dry_run;
            run.skip_existing_check |= skip_existing_check;
            run.dedup_done |= dedup_done;
            run.validate()?;
            cmd_add_work(config?, source, run, cancel).await
        }
        Command::DoWork {
            plates,
            plates_file,
            work_limit,
            no_monitor,
            endpoint,
            lookup_timeout,
            run,
        } => {
            let mut run = run_config(run)?;
            if work_limit.is_some() {
                run.work_limit = work_limit;
            }
            run.validate()?;
            let explicit = match plates_file {
                Some(path) => Some(Source::Lines {
                    path,
                    skip_header: false,
                }),
                None if !plates.is_empty() => Some(Source::List(plates)),
                None => None,
            };
            let lookup = CityPayLookup::new(endpoint, Duration::from_secs(lookup_timeout))?;
            cmd_do_work(config?, explicit, Arc::new(lookup), !no_monitor, run, cancel).await
        }
        Command::Cleanup { sentinel } => {
            let db = connect(&config?, 1).await?;
            let purged = db.purge(&sentinel).await?;
            info!(sentinel, purged, "cleanup finished");
            println!("Purged {purged} record(s) with identifier {sentinel:?}");
            Ok(())
        }
        Command::Requeue { jurisdiction } => {
            let db = connect(&config?, 1).await?;
            let requeued = db.requeue_errors(&jurisdiction).await?;
            info!(jurisdiction, requeued, "requeue finished");
            println!("Requeued {requeued} errored record(s) in {jurisdiction}");
            Ok(())
        }
        Command::Status { jurisdiction, json } => {
            let db = connect(&config?, 1).await?;
            let counts = db.counts(jurisdiction.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                println!("{:<10}  {:>12}", "STATE", "RECORDS");
                println!("{}", "-".repeat(24));
                println!("{:<10}  {:>12}", "pending", counts.pending);
                println!("{:<10}  {:>12}", "done", counts.done);
                println!("{:<10}  {:>12}", "error", counts.error);
                println!("{}", "-".repeat(24));
                println!("{:<10}  {:>12}", "total", counts.total());
            }
            Ok(())
        }
        Command::Monitor {
            jurisdiction,
            interval,
        } => {
            anyhow::ensure!(interval > 0, "--interval must be at least one second");
            let db = connect(&config?, 1).await?;
            let mut monitor = Monitor::new(db, Duration::from_secs(interval));
            if let Some(jurisdiction) = jurisdiction {
                monitor = monitor.jurisdiction(jurisdiction);
            }
            monitor.run(cancel).await;
            Ok(())
        }
        Command::Lookup {
            plate,
            jurisdiction,
            endpoint,
            lookup_timeout,
        } => {
            let lookup = CityPayLookup::new(endpoint, Duration::from_secs(lookup_timeout))?;
            let amount = lookup.total_owed(&plate, &jurisdiction).await?;
            println!("{plate} ({jurisdiction}) owes {amount}");
            Ok(())
        }
    }
}

fn telemetry_config(config: Option<&Config>) -> TelemetryConfig {
    TelemetryConfig {
        endpoint: config.and_then(|c| c.otel_endpoint.clone()),
        service_name: "plateq".to_string(),
        default_filter: config.map_or_else(|| "info".to_string(), |c| c.log_level.clone()),
    }
}

/// Defaults, then the optional TOML file, then CLI flags.
fn run_config(args: RunArgs) -> anyhow::Result<RunConfig> {
    let mut run = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(jurisdiction) = args.jurisdiction {
        run.jurisdiction = jurisdiction;
    }
    if let Some(workers) = args.workers {
        run.workers = workers;
    }
    if let Some(tx_size) = args.tx_size {
        run.tx_size = tx_size;
    }
    Ok(run)
}

async fn connect(config: &Config, max_connections: usize) -> anyhow::Result<Arc<Db>> {
    let db = Db::connect(
        config.database_url.expose_secret(),
        u32::try_from(max_connections).unwrap_or(u32::MAX),
    )
    .await?;
    db.migrate().await?;
    Ok(Arc::new(db))
}

async fn cmd_add_work(
    config: Config,
    source: Source,
    run: RunConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let db = connect(&config, run.workers + 1).await?;
    let producer = Producer::new(db, &run);

    let exclude = producer.done_exclusions(&run).await?;
    let (rx, generated) = generator::spawn(source, exclude, run.channel_capacity, cancel.clone())?;
    let report = producer.ingest(rx, &run, cancel).await?;
    let sent = generated.await??;

    println!(
        "Generated {sent}, added {}, already present {}, failed {}{}{}",
        report.added,
        report.existed,
        report.failed,
        if run.dry_run {
            format!(" (dry run: {} planned)", report.planned)
        } else {
            String::new()
        },
        if report.cancelled { " (interrupted)" } else { "" }
    );
    Ok(())
}

async fn cmd_do_work(
    config: Config,
    explicit: Option<Source>,
    lookup: Arc<dyn Lookup>,
    monitor: bool,
    run: RunConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let db = connect(&config, run.workers + 2).await?;
    let ledger: Arc<dyn Ledger> = db;

    let (feed, sink) = match explicit {
        Some(source) => (
            Feed::list(add_explicit(&ledger, source, &run).await?),
            sink::from_config(Arc::clone(&ledger), &run),
        ),
        None => {
            let queue = Arc::new(WorkQueue::new(Arc::clone(&ledger), &run));
            (
                Feed::queue(Arc::clone(&queue)),
                sink::draining(Arc::clone(&ledger), &run, queue),
            )
        }
    };

    let monitor_stop = cancel.child_token();
    let monitor_task = monitor.then(|| {
        let monitor = Monitor::new(Arc::clone(&ledger), run.monitor_interval())
            .jurisdiction(run.jurisdiction.clone());
        let stop = monitor_stop.clone();
        tokio::spawn(async move { monitor.run(stop).await })
    });

    let pool = WorkerPool::new(&run);
    let report = pool.run(feed, lookup, Arc::clone(&sink), cancel).await;
    let written = sink.flush().await;

    monitor_stop.cancel();
    if let Some(task) = monitor_task {
        if let Err(e) = task.await {
            warn!(error = %e, "monitor task ended abnormally");
        }
    }

    let written = written?;
    println!(
        "Looked up {} plate(s): {} done, {} error; {} written, {} stale, {} failed writes{}",
        report.attempted(),
        report.done,
        report.error,
        written.applied,
        written.stale,
        written.failed,
        if report.cancelled { " (interrupted)" } else { "" }
    );
    Ok(())
}

/// Make sure every identifier of an explicit list is in the ledger, then
/// return the list for the pool.
async fn add_explicit(
    ledger: &Arc<dyn Ledger>,
    source: Source,
    run: &RunConfig,
) -> anyhow::Result<Vec<String>> {
    let identifiers = source.open()?.collect::<plateq::error::Result<Vec<_>>>()?;
    let summary = Producer::new(Arc::clone(ledger), run)
        .add_many_transactional(&identifiers)
        .await?;
    info!(
        plates = identifiers.len(),
        added = summary.added,
        existed = summary.existed,
        "explicit plates registered"
    );
    Ok(identifiers)
}

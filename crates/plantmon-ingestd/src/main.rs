//! Plant Sensor Ingestion Daemon
//!
//! Main entry point for ingestd. Reads newline-delimited JSON readings from a
//! file or stdin, ingests them in batches and reports alert transitions.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle
//! - SI-4: System Monitoring - Continuous threshold evaluation

use anyhow::{bail, Context};
use clap::Parser;
use plantmon_ingestd::{
    AlertManager, IngestPipeline, IngestdConfig, MemoryStore, MetricsCollector, PersistenceStore,
    RawReading, RedisStore, SensorType, StoreBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Default configuration file location
/// NIST: CM-6 - Configuration settings
const DEFAULT_CONFIG_PATH: &str = "/etc/plantmon/ingestd.toml";

#[derive(Debug, Parser)]
#[command(name = "ingestd", version, about = "Plant sensor ingestion and alerting daemon")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// NDJSON readings to ingest, `-` for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Readings per batch, overrides the config file
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Print statistics for `<equipment>:<sensor>` once input is drained
    #[arg(long = "stats", value_name = "EQUIPMENT:SENSOR")]
    stats: Vec<String>,

    /// Write every alert transition to stdout as JSON
    #[arg(long)]
    emit_events: bool,

    /// Dump Prometheus metrics to stdout before exiting
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = IngestdConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(size) = args.batch_size {
        config.pipeline.batch_size = size;
    }
    config.validate()?;

    // NIST: AU-3, AU-12 - Audit logging setup
    init_logging(&config.logging.level, config.logging.json);

    info!("ingestd: Starting sensor ingestion daemon");

    match run(args, config).await {
        Ok(()) => {
            info!("ingestd: Exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "ingestd: Exiting with error");
            Err(e)
        }
    }
}

/// Initialize structured logging
///
/// `RUST_LOG` wins over the configured level when set.
fn init_logging(level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries events, so logs go to stderr
    if json {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .json(),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .compact(),
            )
            .init();
    }
}

async fn open_store(config: &IngestdConfig) -> anyhow::Result<Arc<dyn PersistenceStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Redis => {
            let store = RedisStore::connect(
                &config.store.redis_host,
                config.store.redis_port,
                config.store.redis_db,
                &config.store.key_prefix,
            )
            .await
            .context("connecting to Redis")?;
            info!(
                host = %config.store.redis_host,
                port = config.store.redis_port,
                "ingestd: Connected to Redis"
            );
            Ok(Arc::new(store))
        }
    }
}

async fn open_input(input: &str) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening {input}"))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Line and reading counts for one input stream
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Totals {
    total: usize,
    accepted: usize,
    rejected: usize,
    failed: usize,
    /// Lines that were not JSON readings at all
    skipped: usize,
}

/// Ingest NDJSON readings until end of input or shutdown.
///
/// Shutdown interrupts a blocked read. Lines already read are still ingested
/// and a batch in flight is never cut short.
async fn ingest_stream<R>(
    reader: R,
    pipeline: &IngestPipeline,
    batch_size: usize,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Totals>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let batch_size = batch_size.max(1);
    let mut batch: Vec<RawReading> = Vec::with_capacity(batch_size);
    let mut line_no = 0usize;
    let mut totals = Totals::default();

    loop {
        let next = tokio::select! {
            // Drain buffered input before honouring shutdown
            biased;
            line = lines.next_line() => line.context("reading input")?,
            Ok(()) = shutdown.changed() => {
                info!("ingestd: Received shutdown signal");
                None
            }
        };
        let at_end = next.is_none();

        if let Some(line) = next {
            line_no += 1;
            let line = line.trim();
            if !line.is_empty() {
                match serde_json::from_str::<RawReading>(line) {
                    Ok(raw) => batch.push(raw),
                    Err(e) => {
                        totals.skipped += 1;
                        warn!(line = line_no, error = %e, "ingestd: Skipping undecodable line");
                    }
                }
            }
        }

        if batch.len() >= batch_size || (at_end && !batch.is_empty()) {
            let report = pipeline.ingest(&batch).await;
            totals.total += report.total();
            totals.accepted += report.accepted;
            totals.rejected += report.rejected.len();
            totals.failed += report.failed.len();
            for (index, failure) in &report.failed {
                warn!(index, error = %failure, "ingestd: Reading not processed");
            }
            batch.clear();
        }

        if at_end {
            return Ok(totals);
        }
    }
}

fn parse_stats_target(target: &str) -> anyhow::Result<(String, SensorType)> {
    let Some((equipment, sensor)) = target.rsplit_once(':') else {
        bail!("expected <equipment>:<sensor>, got {target:?}");
    };
    if equipment.trim().is_empty() {
        bail!("empty equipment id in {target:?}");
    }
    Ok((equipment.trim().to_string(), sensor.parse()?))
}

async fn run(args: Args, config: IngestdConfig) -> anyhow::Result<()> {
    let shutdown = setup_signal_handlers();

    let stats_targets = args
        .stats
        .iter()
        .map(|t| parse_stats_target(t))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let metrics = MetricsCollector::new()?;
    let store = open_store(&config).await?;
    let directory = Arc::new(config.build_directory()?);
    info!(
        equipment = directory.equipment_count(),
        "ingestd: Equipment directory loaded"
    );

    let alerts = Arc::new(
        AlertManager::new(store.clone(), config.lifecycle_config()).with_metrics(metrics.clone()),
    );
    let pipeline = IngestPipeline::new(directory, store, alerts.clone(), config.pipeline_config())
        .with_metrics(metrics.clone());

    let printer = args.emit_events.then(|| {
        let mut events = alerts.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "ingestd: Failed to encode alert event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ingestd: Event printer fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let input = open_input(&args.input).await?;
    let batch_size = config.pipeline.batch_size;
    info!(input = %args.input, batch_size, "ingestd: Reading input");

    let totals = ingest_stream(input, &pipeline, batch_size, shutdown).await?;
    info!(
        total = totals.total,
        accepted = totals.accepted,
        rejected = totals.rejected,
        failed = totals.failed,
        skipped = totals.skipped,
        "ingestd: Input drained"
    );

    for (equipment, sensor) in stats_targets {
        let stats = pipeline
            .equipment_statistics(&equipment, sensor, None, None)
            .await?;
        println!(
            "{}",
            serde_json::json!({
                "equipment_id": equipment,
                "sensor_type": sensor,
                "statistics": stats,
            })
        );
    }

    if args.print_metrics {
        print!("{}", metrics.encode_text()?);
    }

    // Dropping the last sender closes the channel and lets the printer finish
    drop(pipeline);
    drop(alerts);
    if let Some(printer) = printer {
        if let Err(e) = printer.await {
            warn!(error = %e, "ingestd: Event printer task failed");
        }
    }

    info!("ingestd: Graceful shutdown complete");
    Ok(())
}

/// Setup signal handlers for graceful shutdown
fn setup_signal_handlers() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("ingestd: Received SIGINT");
            // Nobody listening once the input is drained
            let _ = shutdown_tx.send(true);
        }
    });

    shutdown_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantmon_ingestd::{LifecycleConfig, PipelineConfig, StaticDirectory};

    #[test]
    fn test_parse_stats_target() {
        let (equipment, sensor) = parse_stats_target("PUMP-001:temperature").unwrap();
        assert_eq!(equipment, "PUMP-001");
        assert_eq!(sensor, SensorType::Temperature);
    }

    #[test]
    fn test_parse_stats_target_rejects_garbage() {
        assert!(parse_stats_target("PUMP-001").is_err());
        assert!(parse_stats_target(":temperature").is_err());
        assert!(parse_stats_target("PUMP-001:torque").is_err());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["ingestd"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.input, "-");
        assert!(args.batch_size.is_none());
        assert!(!args.emit_events);
    }

    #[test]
    fn test_args_repeated_stats() {
        let args = Args::parse_from([
            "ingestd",
            "--input",
            "readings.ndjson",
            "--stats",
            "PUMP-001:temperature",
            "--stats",
            "PUMP-002:pressure",
            "--batch-size",
            "10",
        ]);
        assert_eq!(args.stats.len(), 2);
        assert_eq!(args.batch_size, Some(10));
    }

    #[tokio::test]
    async fn test_shutdown_flag() {
        let shutdown = setup_signal_handlers();
        assert!(!*shutdown.borrow());
    }

    fn memory_pipeline() -> IngestPipeline {
        let store = Arc::new(MemoryStore::new());
        let alerts = Arc::new(AlertManager::new(store.clone(), LifecycleConfig::default()));
        IngestPipeline::new(
            Arc::new(StaticDirectory::new()),
            store,
            alerts,
            PipelineConfig::default(),
        )
    }

    const INPUT: &str = concat!(
        r#"{"equipment_id":"PUMP-001","sensor_type":"temperature","value":50,"timestamp":"2024-03-01T08:00:00Z"}"#,
        "\n",
        "not json\n",
        "\n",
        r#"{"equipment_id":"PUMP-001","sensor_type":"torque","value":1,"timestamp":"2024-03-01T08:00:01Z"}"#,
        "\n",
        r#"{"equipment_id":"PUMP-001","sensor_type":"temperature","value":60,"timestamp":"2024-03-01T08:00:02Z"}"#,
        "\n",
    );

    #[tokio::test]
    async fn test_ingest_stream_to_end_of_input() {
        let pipeline = memory_pipeline();
        let (_tx, shutdown) = watch::channel(false);
        let totals = ingest_stream(INPUT.as_bytes(), &pipeline, 2, shutdown)
            .await
            .unwrap();
        assert_eq!(
            totals,
            Totals {
                total: 3,
                accepted: 2,
                rejected: 1,
                failed: 0,
                skipped: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_blocked_read() {
        use tokio::io::AsyncWriteExt;

        let pipeline = memory_pipeline();
        let (mut writer, reader) = tokio::io::duplex(4096);
        writer.write_all(INPUT.as_bytes()).await.unwrap();
        let (shutdown_tx, shutdown) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        // Writer stays open, so only shutdown can end the read loop
        let totals = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            ingest_stream(BufReader::new(reader), &pipeline, 100, shutdown),
        )
        .await
        .expect("read loop ignored shutdown")
        .unwrap();
        assert_eq!(totals.total, 3);
        assert_eq!(totals.accepted, 2);
        drop(writer);
    }
}

//! flurry: writes newline-delimited JSON records to partitioned objects.
//!
//! Each input line is one record; records are routed to one object per topic
//! partition and every open object is committed at end of input.

use bytes::Bytes;
use chrono::DateTime;
use clap::Parser;
use serde::Deserialize;
use snafu::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::net::AddrParseError;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use flurry::error::{ConfigError, MetricsError, WriterError};
use flurry::record::Header;
use flurry::{PartitionKey, Record, StreamWriter, WriterConfig, metrics};

/// Partitioned streaming object writer.
#[derive(Parser, Debug)]
#[command(name = "flurry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Newline-delimited JSON records to write (default: stdin).
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Rotate a partition's object after this many records (0 disables).
    #[arg(long, default_value_t = 0)]
    rotate_every: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without writing.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    #[snafu(display("Invalid metrics address"))]
    AddressParse { source: AddrParseError },

    #[snafu(display("Metrics initialization failed"))]
    Metrics { source: MetricsError },

    #[snafu(display("Writer error"))]
    Writer { source: WriterError },

    #[snafu(display("Failed to read input"))]
    ReadInput { source: std::io::Error },

    #[snafu(display("Invalid record on line {line}"))]
    ParseRecord {
        line: usize,
        source: serde_json::Error,
    },
}

/// One input line.
#[derive(Debug, Deserialize)]
struct InputRecord {
    topic: String,
    partition: u32,
    offset: u64,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, Option<String>>,
}

impl From<InputRecord> for Record {
    fn from(input: InputRecord) -> Self {
        Record {
            topic: input.topic,
            partition: input.partition,
            offset: input.offset,
            timestamp: input.timestamp.and_then(DateTime::from_timestamp_millis),
            key: input.key.map(Bytes::from),
            value: input.value.map(Bytes::from),
            headers: input
                .headers
                .into_iter()
                .map(|(name, value)| Header {
                    name,
                    value: value.map(Bytes::from),
                })
                .collect(),
        }
    }
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("flurry starting");

    let config = WriterConfig::from_file(&args.config).context(ConfigSnafu)?;

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(address = %config.metrics.address, "Metrics endpoint enabled");
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!(url = %config.storage.url, "Storage");
        info!(
            prefix = %config.output.prefix,
            file_name = %config.output.file_name,
            compression = config.output.compression.as_str(),
            format = ?config.output.format,
            "Output"
        );
        info!("Configuration is valid");
        return Ok(());
    }

    let mut writer = StreamWriter::new(&config).await.context(WriterSnafu)?;

    let written = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await.context(ReadInputSnafu)?;
            run(&mut writer, file, args.rotate_every).await?
        }
        None => run(&mut writer, tokio::io::stdin(), args.rotate_every).await?,
    };

    let closed = writer.close_all().await.context(WriterSnafu)?;
    info!(
        records = written,
        objects = closed.len(),
        "Input exhausted, all streams closed"
    );

    Ok(())
}

/// Write every record from `input`, rotating partitions every `rotate_every` records.
async fn run(
    writer: &mut StreamWriter,
    input: impl AsyncRead + Unpin,
    rotate_every: u64,
) -> Result<u64, AppError> {
    let mut lines = BufReader::new(input).lines();
    let mut since_rotation: HashMap<PartitionKey, u64> = HashMap::new();
    let mut written = 0u64;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context(ReadInputSnafu)? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let input: InputRecord =
            serde_json::from_str(&line).context(ParseRecordSnafu { line: line_no })?;
        let record = Record::from(input);
        let partition = record.partition_key();

        writer
            .write(&partition, &record)
            .await
            .context(WriterSnafu)?;
        written += 1;

        if rotate_every > 0 {
            let count = since_rotation.entry(partition.clone()).or_default();
            *count += 1;
            if *count >= rotate_every {
                *count = 0;
                writer.flush(&partition).await.context(WriterSnafu)?;
            }
        }
    }

    Ok(written)
}

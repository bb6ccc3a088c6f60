use std::io;

use aws_config::BehaviorVersion;
use chrono::{DateTime, Utc};
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use cwexport::clock::SystemClock;
use cwexport::fetcher::CloudWatchFetcher;
use cwexport::metric::{Dimension, MetricError, MetricIdentifier};
use cwexport::processor::{ProcessError, Processor, RunSummary};
use cwexport::sink::{CsvSink, JsonSink, Sink};
use cwexport::watermark::NopWatermarkStore;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Export CloudWatch metric samples")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export up to one hour of samples from --start to stdout, without checkpointing
    Local(LocalArgs),
}

#[derive(Args, Debug)]
struct LocalArgs {
    /// Metric namespace, e.g. AWS/Lambda
    #[arg(long)]
    namespace: String,

    /// Metric name
    #[arg(long)]
    name: String,

    /// Dimension as name=value; repeat in the order the metric declares them
    #[arg(long = "dimension", value_name = "NAME=VALUE", value_parser = parse_dimension)]
    dimensions: Vec<Dimension>,

    /// Aggregation statistic
    #[arg(long, default_value = "Sum")]
    stat: String,

    /// Aggregation period in seconds
    #[arg(long, default_value_t = 300)]
    period: u32,

    /// RFC 3339 start of the first window
    #[arg(long, value_parser = parse_time)]
    start: DateTime<Utc>,

    #[arg(long, value_enum, default_value_t = Format::Csv)]
    format: Format,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum Format {
    #[default]
    Csv,
    Json,
}

fn parse_dimension(raw: &str) -> Result<Dimension, String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok(Dimension::new(name, value)),
        _ => Err(format!("expected NAME=VALUE, got {raw:?}")),
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("not an RFC 3339 timestamp: {e}"))
}

fn setup_logging() {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::prelude::*;

    let level = std::env::var("CWEXPORT_LOG_LEVEL")
        .ok()
        .and_then(|val| val.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(level)
        .with(tracing_microjson::JsonLayer::new(io::stderr).with_target(true))
        .init();
}

impl LocalArgs {
    fn metric(&self) -> Result<MetricIdentifier, MetricError> {
        let metric = MetricIdentifier::new(
            &self.namespace,
            &self.name,
            self.dimensions.clone(),
            &self.stat,
            self.period,
        );
        metric.validate()?;
        Ok(metric)
    }
}

async fn export<S: Sink>(
    metric: &MetricIdentifier,
    start: DateTime<Utc>,
    fetcher: CloudWatchFetcher,
    sink: S,
) -> Result<RunSummary, ProcessError> {
    let processor = Processor::new(NopWatermarkStore, fetcher, sink, SystemClock);
    processor.process(metric, start).await
}

#[tokio::main]
async fn main() {
    setup_logging();

    let Cli {
        command: Command::Local(args),
    } = Cli::parse();

    let metric = match args.metric() {
        Ok(metric) => metric,
        Err(e) => Cli::command().error(ErrorKind::ValueValidation, e).exit(),
    };

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let fetcher = CloudWatchFetcher::new(aws_sdk_cloudwatch::Client::new(&sdk_config));

    let result = match args.format {
        Format::Csv => export(&metric, args.start, fetcher, CsvSink::new(io::stdout())).await,
        Format::Json => export(&metric, args.start, fetcher, JsonSink::new(io::stdout())).await,
    };

    match result {
        Ok(summary) => info!(windows = summary.windows, records = summary.records, "export complete"),
        Err(e) => {
            error!(error = %e, "export failed");
            eprintln!("cwexport: {e}");
            std::process::exit(1);
        }
    }
}

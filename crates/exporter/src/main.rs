use aws_config::BehaviorVersion;
use cwexport::clock::SystemClock;
use cwexport::config::Config;
use cwexport::fetcher::CloudWatchFetcher;
use cwexport::handler::Handler;
use cwexport::processor::Processor;
use cwexport::runtime_api::{InitError, RuntimeApiClient};
use cwexport::sink::FirehoseSink;
use cwexport::watermark::DynamoDbWatermarkStore;
use tracing::{error, info};

/// Exceptional init failure: log and exit.
fn fatal(msg: &str, error: &dyn std::fmt::Display) -> ! {
    error!(%error, "{msg}");
    std::process::exit(1);
}

fn setup_logging() {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::prelude::*;

    let level = std::env::var("CWEXPORT_LOG_LEVEL")
        .ok()
        .and_then(|val| {
            val.parse::<LevelFilter>().ok().or_else(|| {
                eprintln!("invalid CWEXPORT_LOG_LEVEL: {val:?}, defaulting to INFO");
                None
            })
        })
        .unwrap_or(LevelFilter::INFO);

    tracing_subscriber::registry()
        .with(level)
        .with(tracing_microjson::JsonLayer::new(std::io::stderr).with_target(true))
        .init();
}

fn setup_rustls() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls ring provider");
}

#[tokio::main]
async fn main() {
    setup_logging();
    setup_rustls();

    let runtime_api = std::env::var("AWS_LAMBDA_RUNTIME_API")
        .unwrap_or_else(|e| fatal("AWS_LAMBDA_RUNTIME_API is not set", &e));
    let api = RuntimeApiClient::new(&runtime_api);

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            let err = InitError::from(e);
            error!(%err, "config error");
            api.report_init_error(&err).await;
            std::process::exit(1);
        }
    };

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;

    let mut dynamodb_config = aws_sdk_dynamodb::config::Builder::from(&sdk_config);
    if let Some(endpoint) = &config.dynamodb_endpoint {
        dynamodb_config = dynamodb_config.endpoint_url(endpoint.as_str());
    }

    let processor = Processor::new(
        DynamoDbWatermarkStore::new(
            aws_sdk_dynamodb::Client::from_conf(dynamodb_config.build()),
            &config.table_name,
        ),
        CloudWatchFetcher::new(aws_sdk_cloudwatch::Client::new(&sdk_config)),
        FirehoseSink::new(
            aws_sdk_firehose::Client::new(&sdk_config),
            &config.delivery_stream,
        ),
        SystemClock,
    );

    info!(
        table = %config.table_name,
        delivery_stream = %config.delivery_stream,
        "ready for invocations"
    );

    let handler = Handler::new(processor, config.default_start);
    if let Err(e) = handler.run(&api).await {
        fatal("runtime API failure", &e);
    }
}

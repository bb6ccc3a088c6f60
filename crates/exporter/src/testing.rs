use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use aws_smithy_mocks::{Rule, RuleMode, mock_client};
use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::fetcher::{FetchError, SampleFetcher};
use crate::metric::{Dimension, ExportedRecord, MetricIdentifier, Sample};
use crate::runtime_api::{ApiError, Invocation, InvocationError, RuntimeApi};
use crate::sink::{SinkError, Sink};
use crate::watermark::{InMemoryWatermarkStore, WatermarkError, WatermarkStore};

pub fn sample_metric() -> MetricIdentifier {
    MetricIdentifier::new(
        "authApi",
        "challengesStarted",
        vec![
            Dimension::new("ServiceName", "challengePostHandler"),
            Dimension::new("ServiceType", "AWS::Lambda::Function"),
        ],
        "Sum",
        300,
    )
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// `reqwest` is built without a default crypto provider.
pub fn setup_rustls() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

pub fn dynamodb_client(rules: &[&Rule]) -> aws_sdk_dynamodb::Client {
    mock_client!(aws_sdk_dynamodb, RuleMode::MatchAny, rules)
}

pub fn cloudwatch_client(mode: RuleMode, rules: &[&Rule]) -> aws_sdk_cloudwatch::Client {
    mock_client!(aws_sdk_cloudwatch, mode, rules)
}

pub fn firehose_client(mode: RuleMode, rules: &[&Rule]) -> aws_sdk_firehose::Client {
    mock_client!(aws_sdk_firehose, mode, rules)
}

/// Returns the same samples for every window and records the windows asked for.
#[derive(Default)]
pub struct MockFetcher {
    pub samples: Vec<Sample>,
    pub calls: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl MockFetcher {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SampleFetcher for MockFetcher {
    async fn get_samples(
        &self,
        _metric: &MetricIdentifier,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, FetchError> {
        self.calls.lock().unwrap().push((start, end));
        Ok(self.samples.clone())
    }
}

pub struct FailingFetcher;

impl SampleFetcher for FailingFetcher {
    async fn get_samples(
        &self,
        metric: &MetricIdentifier,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, FetchError> {
        Err(FetchError::PeriodOutOfRange(metric.period))
    }
}

/// Records every batch it receives. When `fail_on_call` is set, that call
/// (1-indexed) fails and nothing is recorded for it.
#[derive(Default)]
pub struct MockSink {
    pub batches: Mutex<Vec<Vec<Sample>>>,
    pub calls: AtomicU32,
    pub fail_on_call: Option<u32>,
}

impl MockSink {
    pub fn failing_on(call: u32) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<Sample>> {
        self.batches.lock().unwrap().clone()
    }
}

impl Sink for MockSink {
    async fn put(&self, records: &[ExportedRecord<'_>]) -> Result<(), SinkError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_call == Some(call) {
            return Err(SinkError::PartialFailure {
                failed: records.len() as i32,
                attempted: records.len(),
            });
        }
        self.batches
            .lock()
            .unwrap()
            .push(records.iter().map(|r| r.sample).collect());
        Ok(())
    }
}

/// Wraps an in-memory store and fails the `fail_on_put`th write (1-indexed).
pub struct FlakyStore {
    pub inner: InMemoryWatermarkStore,
    pub fail_on_put: u32,
    pub puts: AtomicU32,
}

impl FlakyStore {
    pub fn new(fail_on_put: u32) -> Self {
        Self {
            inner: InMemoryWatermarkStore::new(),
            fail_on_put,
            puts: AtomicU32::new(0),
        }
    }
}

impl WatermarkStore for FlakyStore {
    async fn get(&self, metric: &MetricIdentifier) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        self.inner.get(metric).await
    }

    async fn put(&self, metric: &MetricIdentifier, watermark: DateTime<Utc>) -> Result<(), WatermarkError> {
        let call = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_put {
            return Err(invalid_timestamp_error(metric));
        }
        self.inner.put(metric, watermark).await
    }
}

pub fn invalid_timestamp_error(metric: &MetricIdentifier) -> WatermarkError {
    WatermarkError::InvalidTimestamp {
        key: metric.partition_key(),
        value: "garbage".into(),
        source: DateTime::parse_from_rfc3339("garbage").unwrap_err(),
    }
}

/// Always fails to read.
pub struct UnreadableStore;

impl WatermarkStore for UnreadableStore {
    async fn get(&self, metric: &MetricIdentifier) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        Err(invalid_timestamp_error(metric))
    }

    async fn put(&self, _metric: &MetricIdentifier, _watermark: DateTime<Utc>) -> Result<(), WatermarkError> {
        Ok(())
    }
}

/// Serves queued invocations, then fails with `ApiError::MissingRequestId`
/// once the queue is drained so `Handler::run` returns.
#[derive(Default)]
pub struct MockRuntimeApi {
    pub invocations: Mutex<VecDeque<Invocation>>,
    pub responses: Mutex<Vec<(String, String)>>,
    pub errors: Mutex<Vec<(String, &'static str, String)>>,
}

impl MockRuntimeApi {
    pub fn new(bodies: &[&str]) -> Self {
        let invocations = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| Invocation {
                request_id: format!("req-{i}"),
                deadline_ms: None,
                body: (*body).to_owned(),
            })
            .collect();
        Self {
            invocations: Mutex::new(invocations),
            ..Self::default()
        }
    }
}

impl RuntimeApi for MockRuntimeApi {
    async fn next_invocation(&self) -> Result<Invocation, ApiError> {
        self.invocations
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ApiError::MissingRequestId)
    }

    async fn respond(&self, request_id: &str, body: String) -> Result<(), ApiError> {
        self.responses.lock().unwrap().push((request_id.to_owned(), body));
        Ok(())
    }

    async fn report_invocation_error(&self, request_id: &str, error: &InvocationError) -> Result<(), ApiError> {
        self.errors
            .lock()
            .unwrap()
            .push((request_id.to_owned(), error.error_type(), error.to_string()));
        Ok(())
    }
}

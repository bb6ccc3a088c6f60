use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::debug;

use crate::metric::MetricIdentifier;

const PARTITION_KEY: &str = "_pk";
const SORT_KEY: &str = "_sk";
/// Sort key of the watermark row. Other sort keys under the same partition
/// belong to unrelated application data and are never read here.
const POSITION_SORT_KEY: &str = "position";
const LAST_START_ATTRIBUTE: &str = "lastStart";

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("DynamoDB request failed: {0}")]
    DynamoDb(#[from] aws_sdk_dynamodb::Error),

    #[error("stored watermark for {key} is not RFC 3339: {value:?}")]
    InvalidTimestamp {
        key: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Durable mapping from metric identifier to the instant up to which samples
/// have been forwarded.
///
/// Reads must observe the most recent `put` for the same identifier.
pub trait WatermarkStore {
    fn get(
        &self,
        metric: &MetricIdentifier,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, WatermarkError>> + Send;

    fn put(
        &self,
        metric: &MetricIdentifier,
        watermark: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), WatermarkError>> + Send;
}

/// Watermark rows in a DynamoDB table keyed by `_pk`/`_sk`:
///
/// ```text
/// _pk                              _sk        lastStart
/// ns/logins/metric/Sum/300         position   2022-04-01T13:15:00Z
/// ```
pub struct DynamoDbWatermarkStore {
    client: Client,
    table_name: String,
}

impl DynamoDbWatermarkStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

impl WatermarkStore for DynamoDbWatermarkStore {
    async fn get(&self, metric: &MetricIdentifier) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let key = metric.partition_key();
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, AttributeValue::S(key.clone()))
            .key(SORT_KEY, AttributeValue::S(POSITION_SORT_KEY.to_owned()))
            .consistent_read(true)
            .send()
            .await
            .map_err(aws_sdk_dynamodb::Error::from)?;

        // A row without a string `lastStart` is treated as no watermark.
        let Some(raw) = output
            .item()
            .and_then(|item| item.get(LAST_START_ATTRIBUTE))
            .and_then(|value| value.as_s().ok())
        else {
            debug!(key = %key, "no watermark stored");
            return Ok(None);
        };

        let watermark = parse_watermark(raw).map_err(|source| WatermarkError::InvalidTimestamp {
            key,
            value: raw.clone(),
            source,
        })?;
        Ok(Some(watermark))
    }

    async fn put(&self, metric: &MetricIdentifier, watermark: DateTime<Utc>) -> Result<(), WatermarkError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item(PARTITION_KEY, AttributeValue::S(metric.partition_key()))
            .item(SORT_KEY, AttributeValue::S(POSITION_SORT_KEY.to_owned()))
            .item(LAST_START_ATTRIBUTE, AttributeValue::S(format_watermark(watermark)))
            .send()
            .await
            .map_err(aws_sdk_dynamodb::Error::from)?;
        Ok(())
    }
}

/// Never finds a watermark and discards writes. Every run starts from the
/// caller's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopWatermarkStore;

impl WatermarkStore for NopWatermarkStore {
    async fn get(&self, _metric: &MetricIdentifier) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        Ok(None)
    }

    async fn put(&self, _metric: &MetricIdentifier, _watermark: DateTime<Utc>) -> Result<(), WatermarkError> {
        Ok(())
    }
}

/// Process-local store keyed by [`MetricIdentifier::partition_key`].
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    inner: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    watermarks: HashMap<String, DateTime<Utc>>,
    writes: usize,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watermark(metric: &MetricIdentifier, watermark: DateTime<Utc>) -> Self {
        let store = Self::new();
        store.lock().watermarks.insert(metric.partition_key(), watermark);
        store
    }

    pub fn watermark(&self, metric: &MetricIdentifier) -> Option<DateTime<Utc>> {
        self.lock().watermarks.get(&metric.partition_key()).copied()
    }

    /// Number of `put` calls served so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, metric: &MetricIdentifier) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        Ok(self.watermark(metric))
    }

    async fn put(&self, metric: &MetricIdentifier, watermark: DateTime<Utc>) -> Result<(), WatermarkError> {
        let mut state = self.lock();
        state.watermarks.insert(metric.partition_key(), watermark);
        state.writes += 1;
        Ok(())
    }
}

fn format_watermark(watermark: DateTime<Utc>) -> String {
    watermark.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_watermark(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

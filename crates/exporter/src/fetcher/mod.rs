use std::future::Future;

use aws_sdk_cloudwatch::Client;
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::{Dimension, Metric, MetricDataQuery, MetricStat, ScanBy};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::metric::{MetricIdentifier, Sample};

/// Query id for the single `GetMetricData` query issued per window.
const QUERY_ID: &str = "a";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("CloudWatch request failed: {0}")]
    CloudWatch(#[from] aws_sdk_cloudwatch::Error),

    #[error("metric period {0}s does not fit the CloudWatch period field")]
    PeriodOutOfRange(u32),

    #[error("result {id:?} has {timestamps} timestamps but {values} values")]
    MismatchedResult {
        id: String,
        timestamps: usize,
        values: usize,
    },

    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(AwsDateTime),
}

/// Returns the samples for one metric whose instant lies in `[start, end)`,
/// ascending by time. Pagination is resolved internally.
pub trait SampleFetcher {
    fn get_samples(
        &self,
        metric: &MetricIdentifier,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Sample>, FetchError>> + Send;
}

pub struct CloudWatchFetcher {
    client: Client,
}

impl CloudWatchFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl SampleFetcher for CloudWatchFetcher {
    async fn get_samples(
        &self,
        metric: &MetricIdentifier,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, FetchError> {
        let query = build_query(metric)?;

        let mut pages = self
            .client
            .get_metric_data()
            .start_time(to_aws(start))
            .end_time(to_aws(end))
            .metric_data_queries(query)
            .scan_by(ScanBy::TimestampAscending)
            .into_paginator()
            .send();

        let mut samples = Vec::new();
        let mut page_count = 0usize;
        while let Some(page) = pages.next().await {
            let page = page.map_err(aws_sdk_cloudwatch::Error::from)?;
            page_count += 1;
            for result in page.metric_data_results() {
                let timestamps = result.timestamps();
                let values = result.values();
                if timestamps.len() != values.len() {
                    return Err(FetchError::MismatchedResult {
                        id: result.id().unwrap_or_default().to_owned(),
                        timestamps: timestamps.len(),
                        values: values.len(),
                    });
                }
                for (ts, value) in timestamps.iter().zip(values) {
                    samples.push(Sample::new(from_aws(ts)?, *value));
                }
            }
        }

        debug!(pages = page_count, samples = samples.len(), "fetched metric data");
        Ok(samples)
    }
}

fn build_query(metric: &MetricIdentifier) -> Result<MetricDataQuery, FetchError> {
    let dimensions = metric
        .dimensions()
        .iter()
        .map(|dim| Dimension::builder().name(&dim.name).value(&dim.value).build())
        .collect::<Vec<_>>();

    let period = i32::try_from(metric.period).map_err(|_| FetchError::PeriodOutOfRange(metric.period))?;

    let stat = MetricStat::builder()
        .metric(
            Metric::builder()
                .namespace(metric.namespace())
                .metric_name(metric.metric_name())
                .set_dimensions(Some(dimensions))
                .build(),
        )
        .period(period)
        .stat(&metric.stat)
        .build();

    Ok(MetricDataQuery::builder()
        .id(QUERY_ID)
        .metric_stat(stat)
        .return_data(true)
        .build())
}

fn to_aws(ts: DateTime<Utc>) -> AwsDateTime {
    AwsDateTime::from_millis(ts.timestamp_millis())
}

fn from_aws(ts: &AwsDateTime) -> Result<DateTime<Utc>, FetchError> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()).ok_or(FetchError::TimestampOutOfRange(*ts))
}

#[cfg(test)]
mod tests;

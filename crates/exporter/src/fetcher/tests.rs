use aws_sdk_cloudwatch::operation::get_metric_data::{GetMetricDataError, GetMetricDataOutput};
use aws_sdk_cloudwatch::types::MetricDataResult;
use aws_smithy_mocks::{RuleMode, mock};
use chrono::TimeZone;

use super::*;
use crate::testing::{cloudwatch_client, sample_metric};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 1, 1, h, m, 0).unwrap()
}

fn result(minutes: &[u32], values: &[f64]) -> MetricDataResult {
    MetricDataResult::builder()
        .id(QUERY_ID)
        .set_timestamps(Some(minutes.iter().map(|m| to_aws(at(9, *m))).collect()))
        .set_values(Some(values.to_vec()))
        .build()
}

#[tokio::test]
async fn issues_single_ascending_query_for_window() {
    let rule = mock!(aws_sdk_cloudwatch::Client::get_metric_data)
        .match_requests(|req| {
            let Some(query) = req.metric_data_queries().first() else {
                return false;
            };
            let Some(stat) = query.metric_stat() else {
                return false;
            };
            let dims = stat.metric().map(|m| m.dimensions()).unwrap_or_default();
            req.start_time() == Some(&to_aws(at(9, 0)))
                && req.end_time() == Some(&to_aws(at(9, 5)))
                && req.scan_by() == Some(&ScanBy::TimestampAscending)
                && query.id() == Some(QUERY_ID)
                && query.return_data() == Some(true)
                && stat.period() == Some(300)
                && stat.stat() == Some("Sum")
                && dims.len() == 2
                && dims[0].name() == Some("ServiceName")
                && dims[1].name() == Some("ServiceType")
        })
        .then_output(|| {
            GetMetricDataOutput::builder()
                .metric_data_results(result(&[0], &[4.0]))
                .build()
        });
    let fetcher = CloudWatchFetcher::new(cloudwatch_client(RuleMode::MatchAny, &[&rule]));

    let samples = fetcher.get_samples(&sample_metric(), at(9, 0), at(9, 5)).await.unwrap();
    assert_eq!(samples, vec![Sample::new(at(9, 0), 4.0)]);
}

#[tokio::test]
async fn follows_next_token_across_pages() {
    let first = mock!(aws_sdk_cloudwatch::Client::get_metric_data)
        .match_requests(|req| req.next_token().is_none())
        .then_output(|| {
            GetMetricDataOutput::builder()
                .metric_data_results(result(&[0, 1], &[1.0, 2.0]))
                .next_token("page-2")
                .build()
        });
    let second = mock!(aws_sdk_cloudwatch::Client::get_metric_data)
        .match_requests(|req| req.next_token() == Some("page-2"))
        .then_output(|| {
            GetMetricDataOutput::builder()
                .metric_data_results(result(&[2], &[3.0]))
                .build()
        });
    let fetcher = CloudWatchFetcher::new(cloudwatch_client(RuleMode::Sequential, &[&first, &second]));

    let samples = fetcher.get_samples(&sample_metric(), at(9, 0), at(9, 5)).await.unwrap();
    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0]);
    assert_eq!(samples[2].time, at(9, 2));
}

#[tokio::test]
async fn empty_result_is_empty_vec() {
    let rule = mock!(aws_sdk_cloudwatch::Client::get_metric_data)
        .then_output(|| GetMetricDataOutput::builder().build());
    let fetcher = CloudWatchFetcher::new(cloudwatch_client(RuleMode::MatchAny, &[&rule]));

    let samples = fetcher.get_samples(&sample_metric(), at(9, 0), at(9, 5)).await.unwrap();
    assert!(samples.is_empty());
}

#[tokio::test]
async fn mismatched_result_lengths_are_rejected() {
    let rule = mock!(aws_sdk_cloudwatch::Client::get_metric_data).then_output(|| {
        GetMetricDataOutput::builder()
            .metric_data_results(result(&[0, 1], &[1.0]))
            .build()
    });
    let fetcher = CloudWatchFetcher::new(cloudwatch_client(RuleMode::MatchAny, &[&rule]));

    let err = fetcher.get_samples(&sample_metric(), at(9, 0), at(9, 5)).await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::MismatchedResult {
            timestamps: 2,
            values: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn service_error_is_surfaced() {
    let rule = mock!(aws_sdk_cloudwatch::Client::get_metric_data).then_error(|| {
        GetMetricDataError::generic(
            aws_sdk_cloudwatch::error::ErrorMetadata::builder()
                .code("InvalidParameterValue")
                .build(),
        )
    });
    let fetcher = CloudWatchFetcher::new(cloudwatch_client(RuleMode::MatchAny, &[&rule]));

    let err = fetcher.get_samples(&sample_metric(), at(9, 0), at(9, 5)).await.unwrap_err();
    assert!(matches!(err, FetchError::CloudWatch(_)));
}

#[test]
fn aws_timestamp_conversion_keeps_millis() {
    let ts = Utc.with_ymd_and_hms(2022, 1, 1, 9, 0, 0).unwrap() + chrono::TimeDelta::milliseconds(250);
    assert_eq!(from_aws(&to_aws(ts)).unwrap(), ts);
}

#[test]
fn query_carries_stat_period_and_ordered_dimensions() {
    let query = build_query(&sample_metric()).unwrap();

    assert_eq!(query.id(), Some(QUERY_ID));
    assert_eq!(query.return_data(), Some(true));
    let stat = query.metric_stat().unwrap();
    assert_eq!(stat.period(), Some(300));
    assert_eq!(stat.stat(), Some("Sum"));
    let metric = stat.metric().unwrap();
    assert_eq!(metric.namespace(), Some("authApi"));
    assert_eq!(metric.metric_name(), Some("challengesStarted"));
    let names: Vec<Option<&str>> = metric.dimensions().iter().map(|d| d.name()).collect();
    assert_eq!(names, vec![Some("ServiceName"), Some("ServiceType")]);
    assert_eq!(metric.dimensions()[1].value(), Some("AWS::Lambda::Function"));
}

#[test]
fn period_beyond_i32_is_rejected() {
    let mut metric = sample_metric();
    metric.period = u32::MAX;
    let err = build_query(&metric).unwrap_err();
    assert!(matches!(err, FetchError::PeriodOutOfRange(u32::MAX)));
}

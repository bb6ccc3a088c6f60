use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator used when flattening an identifier into a store key.
const KEY_DELIMITER: &str = "/";

const DEFAULT_PERIOD_SECONDS: u32 = 300;
const DEFAULT_STAT: &str = "Sum";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricError {
    #[error("metric namespace is required but empty")]
    NamespaceMissing,

    #[error("metric name is required but empty")]
    NameMissing,

    #[error("metric statistic is required but empty")]
    StatMissing,

    #[error("metric period must be a positive number of seconds")]
    ZeroPeriod,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metric {
    pub namespace: String,
    pub metric_name: String,
    /// Kept in declaration order. Reordering produces a different identifier.
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

/// A metric plus the aggregation it is exported at.
///
/// Serialises to the CloudWatch `MetricStat` document shape, which is also the
/// payload the scheduled trigger delivers:
///
/// ```json
/// {"Metric":{"Namespace":"authApi","MetricName":"challengesStarted","Dimensions":[]},"Period":300,"Stat":"Sum"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricIdentifier {
    pub metric: Metric,
    /// Aggregation period in seconds.
    #[serde(default = "default_period")]
    pub period: u32,
    #[serde(default = "default_stat")]
    pub stat: String,
}

fn default_period() -> u32 {
    DEFAULT_PERIOD_SECONDS
}

fn default_stat() -> String {
    DEFAULT_STAT.to_owned()
}

impl MetricIdentifier {
    pub fn new(
        namespace: impl Into<String>,
        metric_name: impl Into<String>,
        dimensions: Vec<Dimension>,
        stat: impl Into<String>,
        period: u32,
    ) -> Self {
        Self {
            metric: Metric {
                namespace: namespace.into(),
                metric_name: metric_name.into(),
                dimensions,
            },
            period,
            stat: stat.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.metric.namespace
    }

    pub fn metric_name(&self) -> &str {
        &self.metric.metric_name
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.metric.dimensions
    }

    /// Reject identifiers the source cannot be queried with.
    pub fn validate(&self) -> Result<(), MetricError> {
        if self.metric.namespace.is_empty() {
            return Err(MetricError::NamespaceMissing);
        }
        if self.metric.metric_name.is_empty() {
            return Err(MetricError::NameMissing);
        }
        if self.stat.is_empty() {
            return Err(MetricError::StatMissing);
        }
        if self.period == 0 {
            return Err(MetricError::ZeroPeriod);
        }
        Ok(())
    }

    /// Deterministic store key:
    /// `namespace/dim1name/dim1value/.../metricname/stat/period`.
    pub fn partition_key(&self) -> String {
        let period = self.period.to_string();
        let mut parts: Vec<&str> = Vec::with_capacity(4 + self.metric.dimensions.len() * 2);
        parts.push(&self.metric.namespace);
        for dim in &self.metric.dimensions {
            parts.push(&dim.name);
            parts.push(&dim.value);
        }
        parts.push(&self.metric.metric_name);
        parts.push(&self.stat);
        parts.push(&period);
        parts.join(KEY_DELIMITER)
    }
}

/// One aggregated datapoint returned by the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(time: DateTime<Utc>, value: f64) -> Self {
        Self { time, value }
    }
}

/// Wire shape handed to a sink: the full `MetricStat` document with the
/// sample alongside it under `"sample"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedRecord<'a> {
    #[serde(flatten)]
    pub metric: &'a MetricIdentifier,
    pub sample: Sample,
}

impl<'a> ExportedRecord<'a> {
    pub fn new(metric: &'a MetricIdentifier, sample: Sample) -> Self {
        Self { metric, sample }
    }
}

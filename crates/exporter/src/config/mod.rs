use std::collections::HashMap;
use std::env;

use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

const TABLE_NAME: &str = "METRIC_TABLE_NAME";
const FIREHOSE_NAME: &str = "METRIC_FIREHOSE_NAME";
const START_TIME: &str = "METRIC_START_TIME";
const DYNAMODB_ENDPOINT: &str = "CWEXPORT_DYNAMODB_ENDPOINT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("METRIC_TABLE_NAME is required but not set")]
    TableNameMissing,

    #[error("METRIC_FIREHOSE_NAME is required but not set")]
    FirehoseNameMissing,

    #[error("METRIC_START_TIME is not an RFC 3339 timestamp: {0}")]
    InvalidStartTime(String),

    #[error("CWEXPORT_DYNAMODB_ENDPOINT is not a valid URL: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug)]
pub struct Config {
    pub table_name: String,
    pub delivery_stream: String,
    /// Used when no watermark is stored. `None` means one interval before
    /// the invocation time.
    pub default_start: Option<DateTime<Utc>>,
    pub dynamodb_endpoint: Option<Url>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with("METRIC_") || k.starts_with("CWEXPORT_"))
            .collect();
        Self::parse(&vars)
    }

    fn parse(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let table_name = required(vars, TABLE_NAME).ok_or(ConfigError::TableNameMissing)?;
        let delivery_stream = required(vars, FIREHOSE_NAME).ok_or(ConfigError::FirehoseNameMissing)?;
        let default_start = parse_start_time(vars)?;
        let dynamodb_endpoint = parse_endpoint(vars)?;

        Ok(Self {
            table_name,
            delivery_stream,
            default_start,
            dynamodb_endpoint,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name).filter(|s| !s.is_empty()).cloned()
}

fn parse_start_time(vars: &HashMap<String, String>) -> Result<Option<DateTime<Utc>>, ConfigError> {
    match vars.get(START_TIME).filter(|s| !s.is_empty()) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| ConfigError::InvalidStartTime(raw.clone())),
        None => Ok(None),
    }
}

fn parse_endpoint(vars: &HashMap<String, String>) -> Result<Option<Url>, ConfigError> {
    match vars.get(DYNAMODB_ENDPOINT).filter(|s| !s.is_empty()) {
        Some(raw) => Url::parse(raw)
            .map(Some)
            .map_err(|_| ConfigError::InvalidEndpoint(raw.clone())),
        None => Ok(None),
    }
}

use std::future::Future;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use aws_sdk_firehose::Client;
use aws_sdk_firehose::error::BuildError;
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record;
use chrono::SecondsFormat;
use thiserror::Error;
use tracing::debug;

use crate::metric::ExportedRecord;

/// PutRecordBatch accepts at most 500 records per call.
pub const FIREHOSE_MAX_BATCH: usize = 500;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Firehose request failed: {0}")]
    Firehose(#[from] aws_sdk_firehose::Error),

    #[error("failed to build Firehose record: {0}")]
    Record(#[from] BuildError),

    #[error("Firehose rejected {failed} of {attempted} records")]
    PartialFailure { failed: i32, attempted: usize },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write records: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write CSV row: {0}")]
    Csv(#[from] csv::Error),
}

/// Downstream consumer of exported records.
///
/// The processor calls `put` once per window, including windows with no
/// samples. An empty batch is always a no-op.
pub trait Sink {
    fn put(&self, records: &[ExportedRecord<'_>]) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Forwards records to a Kinesis Data Firehose delivery stream, one
/// newline-terminated JSON document per record.
pub struct FirehoseSink {
    client: Client,
    delivery_stream: String,
}

impl FirehoseSink {
    pub fn new(client: Client, delivery_stream: impl Into<String>) -> Self {
        Self {
            client,
            delivery_stream: delivery_stream.into(),
        }
    }

    async fn put_batch(&self, records: &[ExportedRecord<'_>]) -> Result<(), SinkError> {
        let entries = records
            .iter()
            .map(encode_record)
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .put_record_batch()
            .delivery_stream_name(&self.delivery_stream)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(aws_sdk_firehose::Error::from)?;

        let failed = output.failed_put_count();
        if failed > 0 {
            return Err(SinkError::PartialFailure {
                failed,
                attempted: records.len(),
            });
        }
        Ok(())
    }
}

impl Sink for FirehoseSink {
    async fn put(&self, records: &[ExportedRecord<'_>]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        for chunk in records.chunks(FIREHOSE_MAX_BATCH) {
            self.put_batch(chunk).await?;
        }
        debug!(records = records.len(), stream = %self.delivery_stream, "forwarded records to Firehose");
        Ok(())
    }
}

fn encode_record(record: &ExportedRecord<'_>) -> Result<Record, SinkError> {
    let mut data = serde_json::to_vec(record)?;
    data.push(b'\n');
    Ok(Record::builder().data(Blob::new(data)).build()?)
}

/// Writes one CSV row per record:
/// `namespace,dim/value...,metric,stat,time,value`.
pub struct CsvSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Sink for CsvSink<W> {
    async fn put(&self, records: &[ExportedRecord<'_>]) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut *writer);
        for record in records {
            rows.write_record(csv_row(record))?;
        }
        rows.flush()?;
        Ok(())
    }
}

fn csv_row(record: &ExportedRecord<'_>) -> Vec<String> {
    let metric = record.metric;
    let mut fields = Vec::with_capacity(5 + metric.dimensions().len());
    fields.push(metric.namespace().to_owned());
    for dim in metric.dimensions() {
        fields.push(format!("{}/{}", dim.name, dim.value));
    }
    fields.push(metric.metric_name().to_owned());
    fields.push(metric.stat.clone());
    fields.push(record.sample.time.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    fields.push(format!("{:.6}", record.sample.value));
    fields
}

/// Writes each non-empty batch as a single JSON array line.
pub struct JsonSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Sink for JsonSink<W> {
    async fn put(&self, records: &[ExportedRecord<'_>]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(&mut *writer, records)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

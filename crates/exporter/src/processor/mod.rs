use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::fetcher::{FetchError, SampleFetcher};
use crate::metric::{ExportedRecord, MetricIdentifier};
use crate::sink::{Sink, SinkError};
use crate::watermark::{WatermarkError, WatermarkStore};
use crate::window;

/// First failure of a run, passed through from the collaborator that raised it.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Watermark(#[from] WatermarkError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What a successful run did. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub effective_start: DateTime<Utc>,
    pub windows: u32,
    pub records: usize,
}

/// Exports fixed-width windows of a metric to a sink, advancing the stored
/// watermark after each window is forwarded.
///
/// Runs for the same metric must not overlap: both would resume from the
/// same watermark. Scheduling one invocation at a time per metric is the
/// caller's responsibility.
pub struct Processor<W, F, S, C = SystemClock> {
    store: W,
    fetcher: F,
    sink: S,
    clock: C,
}

impl<W, F, S, C> Processor<W, F, S, C>
where
    W: WatermarkStore,
    F: SampleFetcher,
    S: Sink,
    C: Clock,
{
    pub fn new(store: W, fetcher: F, sink: S, clock: C) -> Self {
        Self {
            store,
            fetcher,
            sink,
            clock,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Process up to [`window::MAX_WINDOWS`] windows for `metric`.
    ///
    /// Starts from the stored watermark when one exists, otherwise from
    /// `default_start`. Stops at the first error; windows completed before it
    /// stay advanced.
    pub async fn process(
        &self,
        metric: &MetricIdentifier,
        default_start: DateTime<Utc>,
    ) -> Result<RunSummary, ProcessError> {
        let effective_start = self.resolve_start(metric, default_start).await?;

        let mut summary = RunSummary {
            effective_start,
            windows: 0,
            records: 0,
        };

        for window in window::plan(effective_start, self.clock.now()) {
            info!(start = %window.start, end = %window.end, "processing window");

            let samples = self
                .fetcher
                .get_samples(metric, window.start, window.end)
                .await
                .inspect_err(|e| error!(error = %e, %window, "failed to get samples for window"))?;

            let records: Vec<ExportedRecord<'_>> = samples
                .into_iter()
                .map(|sample| ExportedRecord::new(metric, sample))
                .collect();

            self.sink
                .put(&records)
                .await
                .inspect_err(|e| error!(error = %e, %window, "failed to forward samples"))?;

            self.store
                .put(metric, window.end)
                .await
                .inspect_err(|e| error!(error = %e, %window, "failed to advance watermark"))?;

            summary.windows += 1;
            summary.records += records.len();
            info!(%window, samples = records.len(), "window complete");
        }

        info!(
            windows = summary.windows,
            records = summary.records,
            "completed all windows"
        );
        Ok(summary)
    }

    /// A stored watermark always wins over the caller's default. The default
    /// is cut to whole seconds, the precision watermarks are stored at.
    async fn resolve_start(
        &self,
        metric: &MetricIdentifier,
        default_start: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ProcessError> {
        let stored = self
            .store
            .get(metric)
            .await
            .inspect_err(|e| error!(error = %e, "failed to read watermark"))?;

        match stored {
            Some(watermark) => {
                info!(%watermark, "resuming from stored watermark");
                Ok(watermark)
            }
            None => {
                let default_start = default_start.trunc_subsecs(0);
                info!(%default_start, "no watermark stored, using default start");
                Ok(default_start)
            }
        }
    }
}

use std::ops::ControlFlow;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::fetcher::SampleFetcher;
use crate::metric::MetricIdentifier;
use crate::processor::Processor;
use crate::runtime_api::{ApiError, InvocationError, RuntimeApi};
use crate::sink::Sink;
use crate::watermark::WatermarkStore;
use crate::window::INTERVAL;

/// Serves metric export invocations from the Lambda Runtime API.
///
/// Each invocation body is a metric identifier. The response body is the
/// run summary; any failure is reported as an invocation error instead.
pub struct Handler<W, F, S, C = SystemClock> {
    processor: Processor<W, F, S, C>,
    default_start: Option<DateTime<Utc>>,
}

impl<W, F, S, C> Handler<W, F, S, C>
where
    W: WatermarkStore,
    F: SampleFetcher,
    S: Sink,
    C: Clock,
{
    pub fn new(processor: Processor<W, F, S, C>, default_start: Option<DateTime<Utc>>) -> Self {
        Self {
            processor,
            default_start,
        }
    }

    /// Serve invocations until the Runtime API itself fails.
    pub async fn run<A: RuntimeApi>(&self, api: &A) -> Result<(), ApiError> {
        loop {
            match self.tick(api).await {
                ControlFlow::Break(e) => return Err(e),
                ControlFlow::Continue(()) => {}
            }
        }
    }

    /// Fetch one invocation, handle it, and post the outcome.
    async fn tick<A: RuntimeApi>(&self, api: &A) -> ControlFlow<ApiError> {
        let invocation = match api.next_invocation().await {
            Ok(invocation) => invocation,
            Err(e) => return ControlFlow::Break(e),
        };
        debug!(request_id = %invocation.request_id, deadline_ms = ?invocation.deadline_ms, "received invocation");

        let posted = match self.handle(&invocation.body).await {
            Ok(body) => api.respond(&invocation.request_id, body).await,
            Err(e) => {
                error!(request_id = %invocation.request_id, error = %e, error_type = e.error_type(), "invocation failed");
                api.report_invocation_error(&invocation.request_id, &e).await
            }
        };

        match posted {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => ControlFlow::Break(e),
        }
    }

    /// Parse the event, run the processor, and encode the summary.
    pub async fn handle(&self, body: &str) -> Result<String, InvocationError> {
        let metric: MetricIdentifier =
            serde_json::from_str(body).map_err(InvocationError::InvalidEvent)?;
        metric.validate()?;

        let default_start = self
            .default_start
            .unwrap_or_else(|| self.processor.clock().now() - INTERVAL);
        info!(metric = %metric.partition_key(), "exporting metric");

        let summary = self.processor.process(&metric, default_start).await?;
        serde_json::to_string(&summary).map_err(InvocationError::Encode)
    }
}

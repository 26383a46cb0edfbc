// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc::Receiver, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::aggregator::{PayloadInfo, TraceAggregator};
use crate::config::Config;
use crate::http_utils::build_client;
use crate::pb::TracerPayload;

/// An explicit flush request. `done` is signalled once every payload
/// buffered at request time has been handed to the intake (or given up on).
pub struct FlushRequest {
    pub(crate) done: oneshot::Sender<()>,
}

impl FlushRequest {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (done, done_rx) = oneshot::channel();
        (FlushRequest { done }, done_rx)
    }
}

#[async_trait]
pub trait TraceFlusher {
    fn new(aggregator: Arc<Mutex<TraceAggregator>>, config: Arc<Config>) -> Self
    where
        Self: Sized;
    /// Runs the flusher loop: buffers payloads arriving on `trace_rx`,
    /// serves explicit flush requests from `flush_rx`, ticks on the
    /// configured interval unless synchronous flushing is enabled, and
    /// performs a final flush when `shutdown` is cancelled.
    async fn start_trace_flusher(
        &self,
        trace_rx: Receiver<PayloadInfo>,
        flush_rx: Receiver<FlushRequest>,
        shutdown: CancellationToken,
    );
    /// Sends a batch of payloads to the intake endpoint. Returns the batch
    /// back if there was an error sending it.
    async fn send(&self, traces: Vec<TracerPayload>) -> Option<Vec<TracerPayload>>;

    /// Flushes traces by getting every available batch on the aggregator.
    /// If `failed_traces` is provided, attempts to send those first.
    /// Returns any traces that failed to send and should be retried.
    async fn flush(&self, failed_traces: Option<Vec<TracerPayload>>) -> Option<Vec<TracerPayload>>;
}

#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct ServerlessTraceFlusher {
    pub aggregator: Arc<Mutex<TraceAggregator>>,
    pub config: Arc<Config>,
}

#[async_trait]
impl TraceFlusher for ServerlessTraceFlusher {
    fn new(aggregator: Arc<Mutex<TraceAggregator>>, config: Arc<Config>) -> Self {
        ServerlessTraceFlusher { aggregator, config }
    }

    async fn start_trace_flusher(
        &self,
        mut trace_rx: Receiver<PayloadInfo>,
        mut flush_rx: Receiver<FlushRequest>,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.trace_flush_interval_secs.max(1),
        ));
        interval.tick().await; // discard first tick, which is instantaneous

        let mut failed_traces: Option<Vec<TracerPayload>> = None;

        loop {
            tokio::select! {
                Some(payload) = trace_rx.recv() => {
                    self.aggregator.lock().await.add(payload);
                }
                Some(request) = flush_rx.recv() => {
                    // Drain payloads already admitted by the receiver so the
                    // explicit flush observes everything buffered before it.
                    self.drain_pending(&mut trace_rx).await;
                    failed_traces = self.flush(failed_traces).await;
                    let _ = request.done.send(());
                }
                _ = interval.tick(), if !self.config.synchronous_flushing => {
                    failed_traces = self.flush(failed_traces).await;
                }
                () = shutdown.cancelled() => {
                    debug!("Trace flusher shutting down, performing final flush");
                    self.drain_pending(&mut trace_rx).await;
                    self.flush(failed_traces).await;
                    break;
                }
            }
        }
    }

    async fn flush(&self, failed_traces: Option<Vec<TracerPayload>>) -> Option<Vec<TracerPayload>> {
        let mut failed_batch: Option<Vec<TracerPayload>> = None;

        if let Some(traces) = failed_traces {
            if !traces.is_empty() {
                debug!("Retrying to send {} previously failed traces", traces.len());
                let retry_result = self.send(traces).await;
                if retry_result.is_some() {
                    // Still failed, return to retry later
                    return retry_result;
                }
            }
        }

        let mut guard = self.aggregator.lock().await;
        let mut traces = guard.get_batch();

        while !traces.is_empty() {
            if let Some(failed) = self.send(traces).await {
                // Stop processing more batches if we have a failure
                failed_batch = Some(failed);
                break;
            }

            traces = guard.get_batch();
        }

        failed_batch
    }

    async fn send(&self, traces: Vec<TracerPayload>) -> Option<Vec<TracerPayload>> {
        if traces.is_empty() {
            return None;
        }
        debug!("Flushing {} traces", traces.len());

        let client = match build_client(
            self.config.proxy_url.as_deref(),
            Duration::from_secs(self.config.flush_timeout_secs),
        ) {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to create HTTP client: {e:?}");
                return None;
            }
        };

        let body = match rmp_serde::to_vec_named(&traces) {
            Ok(body) => body,
            Err(e) => {
                error!("Error serializing trace payloads, dropping them: {e:?}");
                return None;
            }
        };

        let mut request = client
            .post(&self.config.trace_intake.url)
            .header("Content-Type", "application/msgpack")
            .body(body);
        if let Some(api_key) = &self.config.trace_intake.api_key {
            request = request.header("DD-API-KEY", api_key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Successfully flushed traces");
                None
            }
            Ok(response) => {
                error!(
                    "Error sending traces to the intake: response status {}",
                    response.status()
                );
                Some(traces)
            }
            Err(e) => {
                error!("Error sending trace: {e:?}");
                Some(traces)
            }
        }
    }
}

impl ServerlessTraceFlusher {
    /// Moves every payload already sitting in the trace channel into the
    /// aggregator without waiting for more.
    async fn drain_pending(&self, trace_rx: &mut Receiver<PayloadInfo>) {
        let mut guard = self.aggregator.lock().await;
        while let Ok(payload) = trace_rx.try_recv() {
            guard.add(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;
    use crate::pb;
    use tokio::sync::mpsc;

    fn unreachable_intake_config(synchronous: bool) -> Arc<Config> {
        Arc::new(Config {
            synchronous_flushing: synchronous,
            flush_timeout_secs: 1,
            trace_intake: Endpoint {
                // Nothing listens here; sends fail fast with a connection error.
                url: "http://127.0.0.1:9/api/v0.2/traces".to_string(),
                api_key: Some("_not_a_real_key_".to_string()),
            },
            ..Config::default()
        })
    }

    fn payload_info() -> PayloadInfo {
        PayloadInfo::new(
            pb::TracerPayload {
                language_name: "nodejs".to_string(),
                ..pb::TracerPayload::default()
            },
            1,
        )
    }

    #[tokio::test]
    async fn test_send_empty_is_noop() {
        let aggregator = Arc::new(Mutex::new(TraceAggregator::default()));
        let flusher = ServerlessTraceFlusher::new(aggregator, unreachable_intake_config(true));
        assert!(flusher.send(Vec::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_flush_returns_failed_batch_for_retry() {
        let aggregator = Arc::new(Mutex::new(TraceAggregator::default()));
        aggregator.lock().await.add(payload_info());

        let flusher =
            ServerlessTraceFlusher::new(Arc::clone(&aggregator), unreachable_intake_config(true));
        let failed = flusher.flush(None).await;
        assert_eq!(failed.map(|batch| batch.len()), Some(1));
        assert!(aggregator.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_flush_request_is_acknowledged() {
        let aggregator = Arc::new(Mutex::new(TraceAggregator::default()));
        let flusher = ServerlessTraceFlusher::new(aggregator, unreachable_intake_config(true));

        let (trace_tx, trace_rx) = mpsc::channel(10);
        let (flush_tx, flush_rx) = mpsc::channel(10);
        let shutdown = CancellationToken::new();

        let flusher_task = {
            let flusher = flusher.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                flusher
                    .start_trace_flusher(trace_rx, flush_rx, shutdown)
                    .await;
            })
        };

        trace_tx.send(payload_info()).await.unwrap();
        let (request, done_rx) = FlushRequest::new();
        flush_tx.send(request).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("flush was not acknowledged")
            .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), flusher_task)
            .await
            .expect("flusher did not stop on cancellation")
            .unwrap();
    }
}

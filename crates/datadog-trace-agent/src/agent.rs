// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use hyper::service::service_fn;
use hyper::{http, Method, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::aggregator::{PayloadInfo, TraceAggregator};
use crate::config::Config;
use crate::error::AgentError;
use crate::hooks::SpanHooks;
use crate::http_utils::{body_from, body_incoming, HttpRequest, HttpResponse};
use crate::trace_flusher::{FlushRequest, ServerlessTraceFlusher, TraceFlusher};
use crate::trace_processor::{ServerlessTraceProcessor, TraceProcessor};

const TRACE_ENDPOINT_PATH: &str = "/v0.4/traces";
const INFO_ENDPOINT_PATH: &str = "/info";
const TRACER_PAYLOAD_CHANNEL_BUFFER_SIZE: usize = 10;
const FLUSH_REQUEST_CHANNEL_BUFFER_SIZE: usize = 10;

/// Tag state applied uniformly to every payload passing through the agent.
pub type GlobalTags = Arc<RwLock<HashMap<String, String>>>;

/// The embedded trace agent: a loopback HTTP receiver feeding a flusher
/// task, both scoped to a cancellation token.
///
/// Construct with [`Agent::new`], install the per-span hook slots, then call
/// [`Agent::run`] exactly once. The run loop stops cooperatively when the
/// token given at construction is cancelled.
pub struct Agent {
    pub config: Arc<Config>,
    /// Writable hook slots, consulted per received span. Install between
    /// construction and `run`.
    pub hooks: SpanHooks,
    global_tags: GlobalTags,
    shutdown_token: CancellationToken,
    trace_tx: Sender<PayloadInfo>,
    trace_rx: TokioMutex<Option<Receiver<PayloadInfo>>>,
    flush_tx: Sender<FlushRequest>,
    flush_rx: TokioMutex<Option<Receiver<FlushRequest>>>,
    bound_addr: Arc<TokioMutex<Option<SocketAddr>>>,
    trace_processor: Arc<dyn TraceProcessor + Send + Sync>,
}

impl Agent {
    pub fn new(shutdown_token: CancellationToken, config: Config) -> Agent {
        let (trace_tx, trace_rx) = mpsc::channel(TRACER_PAYLOAD_CHANNEL_BUFFER_SIZE);
        let (flush_tx, flush_rx) = mpsc::channel(FLUSH_REQUEST_CHANNEL_BUFFER_SIZE);
        Agent {
            config: Arc::new(config),
            hooks: SpanHooks::default(),
            global_tags: Arc::new(RwLock::new(HashMap::new())),
            shutdown_token,
            trace_tx,
            trace_rx: TokioMutex::new(Some(trace_rx)),
            flush_tx,
            flush_rx: TokioMutex::new(Some(flush_rx)),
            bound_addr: Arc::new(TokioMutex::new(None)),
            trace_processor: Arc::new(ServerlessTraceProcessor {}),
        }
    }

    /// Runs the agent until its cancellation token is cancelled: spawns the
    /// flusher task and serves the trace receiver endpoints on loopback.
    ///
    /// Call once; a second call returns `AgentError::AlreadyRunning`.
    pub async fn run(&self) -> Result<(), AgentError> {
        let now = Instant::now();

        let trace_rx = self
            .trace_rx
            .lock()
            .await
            .take()
            .ok_or(AgentError::AlreadyRunning)?;
        let flush_rx = self
            .flush_rx
            .lock()
            .await
            .take()
            .ok_or(AgentError::AlreadyRunning)?;

        // start our trace flusher. receives trace payloads and flush
        // requests, and handles buffering + deciding when to flush.
        let trace_flusher = ServerlessTraceFlusher::new(
            Arc::new(TokioMutex::new(TraceAggregator::default())),
            Arc::clone(&self.config),
        );
        let flusher_shutdown = self.shutdown_token.clone();
        tokio::spawn(async move {
            trace_flusher
                .start_trace_flusher(trace_rx, flush_rx, flusher_shutdown)
                .await;
        });

        // setup our hyper http server, where the endpoint_handler handles
        // incoming requests
        let trace_processor = Arc::clone(&self.trace_processor);
        let endpoint_config = Arc::clone(&self.config);
        let trace_tx = self.trace_tx.clone();
        let hooks = self.hooks.clone();
        let global_tags = Arc::clone(&self.global_tags);

        let service = service_fn(move |req| {
            // called for each http request
            let trace_processor = Arc::clone(&trace_processor);
            let endpoint_config = Arc::clone(&endpoint_config);
            let trace_tx = trace_tx.clone();
            let hooks = hooks.clone();
            let global_tags = Arc::clone(&global_tags);

            Agent::trace_endpoint_handler(
                endpoint_config,
                req.map(body_incoming),
                trace_processor,
                trace_tx,
                hooks,
                global_tags,
            )
        });

        let addr = SocketAddr::from(([127, 0, 0, 1], self.config.receiver_port));
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        *self.bound_addr.lock().await = Some(local_addr);

        debug!("Trace agent started: listening on port {}", local_addr.port());
        debug!(
            "Time taken to start the trace agent: {} ms",
            now.elapsed().as_millis()
        );

        self.serve_tcp(listener, service).await
    }

    async fn serve_tcp<S>(&self, listener: tokio::net::TcpListener, service: S) -> Result<(), AgentError>
    where
        S: hyper::service::Service<
                hyper::Request<hyper::body::Incoming>,
                Response = HttpResponse,
            > + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
                () = self.shutdown_token.cancelled() => {
                    debug!("Trace agent shutting down: cancellation requested");
                    return Ok(());
                }
            };
            let conn = TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    async fn trace_endpoint_handler(
        config: Arc<Config>,
        req: HttpRequest,
        trace_processor: Arc<dyn TraceProcessor + Send + Sync>,
        trace_tx: Sender<PayloadInfo>,
        hooks: SpanHooks,
        global_tags: GlobalTags,
    ) -> http::Result<HttpResponse> {
        match (req.method(), req.uri().path()) {
            (&Method::PUT | &Method::POST, TRACE_ENDPOINT_PATH) => {
                trace_processor
                    .process_traces(config, req, trace_tx, hooks, global_tags)
                    .await
            }
            (_, INFO_ENDPOINT_PATH) => Self::info_handler(config.receiver_port),
            _ => {
                let mut not_found = Response::new(body_from(""));
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    fn info_handler(receiver_port: u16) -> http::Result<HttpResponse> {
        let response_json = json!(
            {
                "endpoints": [
                    TRACE_ENDPOINT_PATH,
                    INFO_ENDPOINT_PATH
                ],
                "client_drop_p0s": true,
                "config": {
                    "receiver_port": receiver_port,
                }
            }
        );
        Response::builder()
            .status(200)
            .body(body_from(response_json.to_string()))
    }

    /// Requests a flush and blocks until the flusher confirms every buffered
    /// payload was handed to the intake.
    pub async fn flush_sync(&self) {
        let (request, done_rx) = FlushRequest::new();
        if self.flush_tx.send(request).await.is_err() {
            error!("Could not request a synchronous flush: the trace flusher is gone");
            return;
        }
        if done_rx.await.is_err() {
            error!("The trace flusher dropped the flush confirmation");
        }
    }

    /// Replaces the agent's global tag state as a whole (never merged).
    /// Callers must ensure no unsynchronized concurrent use of this
    /// specific call.
    pub fn set_global_tags_unsafe(&self, tags: HashMap<String, String>) {
        match self.global_tags.write() {
            Ok(mut guard) => *guard = tags,
            Err(poisoned) => *poisoned.into_inner() = tags,
        }
    }

    /// Snapshot of the agent's global tag state.
    pub fn global_tags(&self) -> HashMap<String, String> {
        match self.global_tags.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The address the receiver is bound on, once `run` has bound it.
    /// Useful with an OS-assigned port (`receiver_port: 0`).
    pub async fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock().await
    }

    /// Waits for the receiver to publish its bound address, up to `timeout`.
    pub async fn await_bound_addr(&self, timeout: Duration) -> Option<SocketAddr> {
        let start = Instant::now();
        loop {
            if let Some(addr) = self.bound_addr().await {
                return Some(addr);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

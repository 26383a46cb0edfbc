// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::BodyExt;
use hyper::{http, HeaderMap, StatusCode};
use tokio::sync::mpsc::Sender;
use tracing::debug;

use crate::agent::GlobalTags;
use crate::aggregator::PayloadInfo;
use crate::config::Config;
use crate::hooks::SpanHooks;
use crate::http_utils::{
    self, log_and_create_http_response, log_and_create_traces_success_http_response, HttpRequest,
    HttpResponse,
};
use crate::pb;

/// Sampling priority stamped on chunks from this receiver. The embedded
/// agent does not sample; every admitted chunk is kept.
const SAMPLER_PRIORITY_AUTO_KEEP: i32 = 1;

/// Tracer metadata extracted from request headers.
#[derive(Clone, Debug, Default)]
pub struct TracerHeaderTags {
    pub lang: String,
    pub lang_version: String,
    pub tracer_version: String,
    pub container_id: String,
}

impl From<&HeaderMap> for TracerHeaderTags {
    fn from(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        TracerHeaderTags {
            lang: get("datadog-meta-lang"),
            lang_version: get("datadog-meta-lang-version"),
            tracer_version: get("datadog-meta-tracer-version"),
            container_id: get("datadog-container-id"),
        }
    }
}

#[async_trait]
pub trait TraceProcessor {
    /// Deserializes traces from a request body, runs the per-span hooks, and
    /// sends the resulting payload through the provided tokio mpsc Sender.
    async fn process_traces(
        &self,
        config: Arc<Config>,
        req: HttpRequest,
        tx: Sender<PayloadInfo>,
        hooks: SpanHooks,
        global_tags: GlobalTags,
    ) -> http::Result<HttpResponse>;
}

#[derive(Clone)]
pub struct ServerlessTraceProcessor {}

#[async_trait]
impl TraceProcessor for ServerlessTraceProcessor {
    async fn process_traces(
        &self,
        config: Arc<Config>,
        req: HttpRequest,
        tx: Sender<PayloadInfo>,
        hooks: SpanHooks,
        global_tags: GlobalTags,
    ) -> http::Result<HttpResponse> {
        debug!("Received traces to process");
        let (parts, body) = req.into_parts();

        if let Some(response) = http_utils::verify_request_content_length(
            &parts.headers,
            config.max_request_content_length,
            "Error processing traces",
        ) {
            return response;
        }

        let tracer_header_tags = TracerHeaderTags::from(&parts.headers);

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                return log_and_create_http_response(
                    &format!("Error reading traces request body: {err}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };
        let body_size = body_bytes.len();

        // double check content length in case transfer encoding is used
        if body_size > config.max_request_content_length {
            return log_and_create_http_response(
                "Error processing traces: Payload too large",
                StatusCode::PAYLOAD_TOO_LARGE,
            );
        }

        // deserialize traces from the request body (v0.4 msgpack format: an
        // array of traces, each an array of spans)
        let traces: Vec<Vec<pb::Span>> = match rmp_serde::from_slice(&body_bytes) {
            Ok(res) => res,
            Err(err) => {
                return log_and_create_http_response(
                    &format!("Error deserializing trace from request body: {err}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        };

        let mut chunks: Vec<pb::TraceChunk> = Vec::with_capacity(traces.len());
        for mut spans in traces {
            // the discard hook is consulted before a span is admitted into
            // the pipeline; the mutation hook runs on admitted spans only
            spans.retain(|span| !hooks.should_discard(span));
            for span in &mut spans {
                hooks.apply_modify(span);
            }
            if spans.is_empty() {
                continue;
            }
            chunks.push(pb::TraceChunk {
                priority: SAMPLER_PRIORITY_AUTO_KEEP,
                origin: String::new(),
                spans,
                tags: HashMap::new(),
                dropped_trace: false,
            });
        }

        if chunks.is_empty() {
            return log_and_create_traces_success_http_response(
                "No spans remaining after filtering.",
                StatusCode::OK,
            );
        }

        let tags = match global_tags.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let payload = pb::TracerPayload {
            container_id: tracer_header_tags.container_id,
            language_name: tracer_header_tags.lang,
            language_version: tracer_header_tags.lang_version,
            tracer_version: tracer_header_tags.tracer_version,
            runtime_id: String::new(),
            chunks,
            tags,
            env: config.tags.get("env").cloned().unwrap_or_default(),
            hostname: config.hostname.clone(),
            app_version: String::new(),
        };

        // send trace payload to our trace flusher
        match tx.send(PayloadInfo::new(payload, body_size)).await {
            Ok(()) => log_and_create_traces_success_http_response(
                "Successfully buffered traces to be flushed.",
                StatusCode::OK,
            ),
            Err(err) => log_and_create_http_response(
                &format!("Error sending traces to the trace flusher: {err}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }
}

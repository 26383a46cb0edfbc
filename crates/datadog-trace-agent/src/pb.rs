// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace payload data model shared between the receiver and the intake
//! transport. Tracers submit spans as msgpack; the field names below are the
//! wire names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Span {
    /// service is the name of the service with which this span is associated.
    pub service: String,
    /// name is the operation name of this span.
    pub name: String,
    /// resource is the resource name of this span, also sometimes called the
    /// endpoint (for web spans).
    pub resource: String,
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: u64,
    /// start is the number of nanoseconds between the Unix epoch and the
    /// beginning of this span.
    pub start: i64,
    /// duration is the time length of this span in nanoseconds.
    pub duration: i64,
    /// error is 1 if there is an error associated with this span, or 0 if not.
    pub error: i32,
    /// meta is a mapping from tag name to tag value for string-valued tags.
    pub meta: HashMap<String, String>,
    /// metrics is a mapping from tag name to tag value for numeric-valued tags.
    pub metrics: HashMap<String, f64>,
    #[serde(rename = "type")]
    pub r#type: String,
}

/// TraceChunk represents a list of spans with the same trace ID.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceChunk {
    /// priority specifies sampling priority of the trace.
    pub priority: i32,
    /// origin specifies origin product ("lambda", "rum", etc.) of the trace.
    pub origin: String,
    pub spans: Vec<Span>,
    /// tags specifies tags common in all `spans`.
    pub tags: HashMap<String, String>,
    /// dropped_trace specifies whether the trace was dropped by samplers.
    pub dropped_trace: bool,
}

/// TracerPayload represents a payload the trace agent receives from tracers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerPayload {
    pub container_id: String,
    pub language_name: String,
    pub language_version: String,
    pub tracer_version: String,
    pub runtime_id: String,
    pub chunks: Vec<TraceChunk>,
    /// tags specifies tags common in all `chunks`.
    pub tags: HashMap<String, String>,
    /// env specifies the `env` tag set with the tracer.
    pub env: String,
    /// hostname of where the tracer is running. Empty in serverless mode.
    pub hostname: String,
    pub app_version: String,
}

impl TracerPayload {
    /// Total number of spans across all chunks.
    pub fn span_count(&self) -> usize {
        self.chunks.iter().map(|c| c.spans.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_msgpack_round_trip() {
        let mut span = Span {
            service: "my-service".to_string(),
            name: "http.request".to_string(),
            resource: "GET /".to_string(),
            trace_id: 11,
            span_id: 222,
            parent_id: 0,
            start: 1_000_000,
            duration: 5_000,
            ..Span::default()
        };
        span.meta
            .insert("http.url".to_string(), "https://example.com/".to_string());

        let bytes = rmp_serde::to_vec_named(&span).unwrap();
        let decoded: Span = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(span, decoded);
    }

    #[test]
    fn test_span_decodes_with_missing_fields() {
        // Tracers routinely omit empty maps and zero-valued fields.
        let bytes = rmp_serde::to_vec_named(&serde_json::json!({
            "service": "s",
            "name": "n",
            "resource": "r",
            "trace_id": 1u64,
            "span_id": 2u64,
        }))
        .unwrap();
        let decoded: Span = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.service, "s");
        assert_eq!(decoded.parent_id, 0);
        assert!(decoded.meta.is_empty());
    }

    #[test]
    fn test_span_count() {
        let chunk = TraceChunk {
            spans: vec![Span::default(), Span::default()],
            ..TraceChunk::default()
        };
        let payload = TracerPayload {
            chunks: vec![chunk.clone(), chunk],
            ..TracerPayload::default()
        };
        assert_eq!(payload.span_count(), 4);
    }
}

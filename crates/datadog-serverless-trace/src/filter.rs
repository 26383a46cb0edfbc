// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_trace_agent::pb;
use tracing::debug;

/// The key of the span meta containing the HTTP URL
const HTTP_URL_META_KEY: &str = "http.url";

/// The first part of a URL for a call to the Lambda runtime API
const LAMBDA_RUNTIME_URL_PREFIX: &str = "http://127.0.0.1:9001";

/// The first part of a URL for a call from the tracing library to the Lambda
/// extension
const LAMBDA_EXTENSION_URL_PREFIX: &str = "http://127.0.0.1:8124";

/// The first part of a URL for a call to the local statsd endpoint
const LAMBDA_STATSD_URL_PREFIX: &str = "http://127.0.0.1:8125";

/// Resource name of the invocation wrapper spans the tracer generates around
/// each handler call.
const INVOCATION_SPAN_RESOURCE: &str = "dd-tracer-serverless-span";

/// Returns true if a span was generated by internal HTTP calls within the
/// tracing library or the Lambda runtime, rather than by the traced
/// application.
///
/// Registered on the agent as its discard predicate. An absent span is kept.
pub fn should_discard(span: Option<&pb::Span>) -> bool {
    if let Some(val) = span.and_then(|s| s.meta.get(HTTP_URL_META_KEY)) {
        if val.starts_with(LAMBDA_EXTENSION_URL_PREFIX) {
            debug!("Detected span with http url {}, removing it", val);
            return true;
        }

        if val.starts_with(LAMBDA_STATSD_URL_PREFIX) {
            debug!("Detected span with http url {}, removing it", val);
            return true;
        }

        if val.starts_with(LAMBDA_RUNTIME_URL_PREFIX) {
            debug!("Detected span with http url {}, removing it", val);
            return true;
        }
    }
    if let Some(span) = span {
        if span.resource == INVOCATION_SPAN_RESOURCE {
            debug!("Detected invocation span from tracer, removing it");
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_with_url(url: &str) -> pb::Span {
        let mut span = pb::Span {
            service: "test-service".to_string(),
            name: "http.request".to_string(),
            resource: "GET /".to_string(),
            ..pb::Span::default()
        };
        span.meta
            .insert(HTTP_URL_META_KEY.to_string(), url.to_string());
        span
    }

    #[test]
    fn test_discards_extension_callback_spans() {
        let span = span_with_url("http://127.0.0.1:8124/lambda/flush");
        assert!(should_discard(Some(&span)));
    }

    #[test]
    fn test_discards_statsd_spans() {
        let span = span_with_url("http://127.0.0.1:8125/");
        assert!(should_discard(Some(&span)));
    }

    #[test]
    fn test_discards_runtime_api_spans() {
        let span = span_with_url("http://127.0.0.1:9001/2018-06-01/runtime/invocation/next");
        assert!(should_discard(Some(&span)));
    }

    #[test]
    fn test_keeps_spans_with_other_urls() {
        let span = span_with_url("https://example.com/");
        assert!(!should_discard(Some(&span)));
    }

    #[test]
    fn test_prefix_match_is_case_sensitive() {
        let span = span_with_url("HTTP://127.0.0.1:8124/lambda/flush");
        assert!(!should_discard(Some(&span)));
    }

    #[test]
    fn test_discards_invocation_wrapper_span() {
        let span = pb::Span {
            resource: "dd-tracer-serverless-span".to_string(),
            ..pb::Span::default()
        };
        assert!(should_discard(Some(&span)));
    }

    #[test]
    fn test_url_rule_wins_over_resource_rule() {
        let mut span = span_with_url("http://127.0.0.1:9001/");
        span.resource = "dd-tracer-serverless-span".to_string();
        assert!(should_discard(Some(&span)));
    }

    #[test]
    fn test_keeps_plain_spans() {
        let span = pb::Span {
            resource: "GET /users".to_string(),
            ..pb::Span::default()
        };
        assert!(!should_discard(Some(&span)));
    }

    #[test]
    fn test_absent_span_is_kept_without_fault() {
        assert!(!should_discard(None));
    }
}

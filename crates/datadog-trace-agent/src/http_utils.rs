// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    header,
    http::{self, HeaderMap},
    Request, Response, StatusCode,
};
use serde_json::json;
use std::error::Error;
use tracing::{debug, error};

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Unified request/response body. Incoming hyper bodies and in-memory
/// buffers (used by handlers and tests) are boxed into the same type.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

pub type HttpRequest = Request<Body>;
pub type HttpResponse = Response<Body>;

/// Boxes an in-memory buffer into [`Body`].
pub fn body_from(data: impl Into<Bytes>) -> Body {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Boxes a hyper [`Incoming`] request body into [`Body`].
pub fn body_incoming(incoming: Incoming) -> Body {
    incoming.map_err(|e| Box::new(e) as BoxError).boxed_unsync()
}

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will
///    cause a debug log to be written, otherwise error will be written.
/// 2. Returns the given message in the body of JSON response with the given
///    status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder().status(status).body(body_from(body))
}

/// Does two things:
/// 1. Logs the given message
/// 2. Returns the rate_by_service map to use to set the sampling priority in
///    the body of JSON response with the given status code.
pub fn log_and_create_traces_success_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    debug!("{message}");
    let body = json!({"rate_by_service":{"service:,env:":1}}).to_string();
    Response::builder().status(status).body(body_from(body))
}

/// Takes a request's header map, and verifies that the "content-length"
/// and/or "Transfer-Encoding" header is present, valid, and less than the
/// given max_content_length.
///
/// Will return None if no issues are found. Otherwise logs an error (with the
/// given prefix) and returns an HTTP Response with the appropriate error
/// status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let content_length_header = match header_map.get(header::CONTENT_LENGTH) {
        Some(res) => res,
        None => {
            if let Some(transfer_encoding_header) = header_map.get(header::TRANSFER_ENCODING) {
                debug!(
                    "Transfer-Encoding header is present: {:?}",
                    transfer_encoding_header
                );
                return None;
            }
            return Some(log_and_create_http_response(
                &format!(
                    "{error_message_prefix}: Missing Content-Length and Transfer-Encoding header"
                ),
                StatusCode::LENGTH_REQUIRED,
            ));
        }
    };
    let header_as_string = match content_length_header.to_str() {
        Ok(res) => res,
        Err(_) => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    let content_length = match header_as_string.parse::<usize>() {
        Ok(res) => res,
        Err(_) => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}

/// Builds a reqwest client with optional proxy configuration and timeout.
/// Uses rustls TLS.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    Ok(builder.build()?)
}

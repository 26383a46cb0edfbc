// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle adapter embedding the trace agent in a serverless function
//! host.
//!
//! A serverless invocation can be frozen or killed with no notice, so the
//! adapter runs the agent with timer-based flushing disabled and exposes a
//! synchronous flush the host calls at the end of every invocation. It also
//! drops the spans the tracing library generates for its own HTTP calls to
//! local runtime endpoints, and stamps invocation metadata onto every
//! admitted span.

pub mod filter;
pub mod lifecycle;
pub mod mode;
pub mod span_modifier;

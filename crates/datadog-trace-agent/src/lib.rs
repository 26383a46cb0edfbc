// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod agent;
pub mod aggregator;
pub mod config;
pub mod error;
pub mod hooks;
pub mod http_utils;
pub mod pb;
pub mod trace_flusher;
pub mod trace_processor;

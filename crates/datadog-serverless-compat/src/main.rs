// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{collections::HashMap, env, path::PathBuf};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use datadog_serverless_trace::lifecycle::{FileConfigLoader, ServerlessTraceAgent};
use datadog_serverless_trace::mode::ServerlessMode;

const TRACE_FLUSH_INTERVAL: u64 = 10;
const DEFAULT_CONFIG_PATH: &str = "datadog.yaml";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("DD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");
    debug!("Starting serverless trace agent");

    let enabled = env::var("DD_TRACE_ENABLED")
        .map(|val| val.to_lowercase() != "false")
        .unwrap_or(true);
    let config_path = env::var("DD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mode = ServerlessMode::new();
    let loader = FileConfigLoader::new(config_path, mode.clone());
    let mut trace_agent = ServerlessTraceAgent::new(mode);
    trace_agent.start(enabled, &loader);

    if trace_agent.get().is_none() {
        info!("Trace collection is disabled for this process");
    }

    if let Ok(env_tags) = env::var("DD_TAGS") {
        trace_agent.set_tags(parse_tags(&env_tags));
    }

    let mut flush_interval = interval(Duration::from_secs(TRACE_FLUSH_INTERVAL));
    flush_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            _ = flush_interval.tick() => {
                debug!("Flushing traces");
                trace_agent.flush().await;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {e}");
                }
                info!("Shutting down: performing a final flush");
                trace_agent.flush().await;
                trace_agent.stop();
                break;
            }
        }
    }
}

/// Parses `DD_TAGS`-style tag strings into a map.
///
/// Space-separated key:value tags are the standard for tagging. For
/// compatibility reasons comma-separated key:value tags are supported too.
fn parse_tags(env_tags: &str) -> HashMap<String, String> {
    let normalized = env_tags.replace(',', " ");
    let mut tags = HashMap::new();
    for kv in normalized.split_whitespace() {
        let parts = kv.split(':').collect::<Vec<&str>>();
        if parts.len() == 2 {
            tags.insert(parts[0].to_string(), parts[1].to_string());
        }
    }
    tags
}

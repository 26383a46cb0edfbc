// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use datadog_trace_agent::agent::Agent;
use datadog_trace_agent::config::{Config, ConfigError};
use datadog_trace_agent::hooks::SpanHooks;

use crate::filter;
use crate::mode::ServerlessMode;
use crate::span_modifier::SpanModifier;

/// Abstracts the configuration loading performed during
/// [`ServerlessTraceAgent::start`].
pub trait ConfigLoader {
    fn load(&self) -> Result<Config, ConfigError>;
}

/// Loads the config from a file path.
///
/// Hostname resolution is skipped when the process runs in serverless mode;
/// it saves noticeable startup latency and the hostname is cleared for this
/// environment anyway.
pub struct FileConfigLoader {
    pub path: PathBuf,
    mode: ServerlessMode,
}

impl FileConfigLoader {
    pub fn new(path: impl Into<PathBuf>, mode: ServerlessMode) -> Self {
        FileConfigLoader {
            path: path.into(),
            mode,
        }
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        Config::from_file(&self.path, !self.mode.is_enabled())
    }
}

/// A trace agent in a serverless context.
///
/// Constructed inactive; a successful [`start`](Self::start) makes it active
/// for the process lifetime. Every operation on an inactive controller is a
/// guarded no-op, so host integration code never needs to check activity
/// before calling.
#[derive(Default)]
pub struct ServerlessTraceAgent {
    ta: Option<Arc<Agent>>,
    span_modifier: Option<Arc<SpanModifier>>,
    cancel: Option<CancellationToken>,
    mode: ServerlessMode,
}

impl ServerlessTraceAgent {
    pub fn new(mode: ServerlessMode) -> Self {
        ServerlessTraceAgent {
            ta: None,
            span_modifier: None,
            cancel: None,
            mode,
        }
    }

    /// Starts the agent as a background task.
    ///
    /// Does nothing when `enabled` is false. A config load failure is logged
    /// and leaves the controller inactive; it is not fatal to the host.
    /// Must be called from within a tokio runtime, once per process.
    pub fn start(&mut self, enabled: bool, loader: &dyn ConfigLoader) {
        if !enabled {
            return;
        }

        // Flag serverless mode before loading so downstream config logic
        // skips hostname resolution.
        self.mode.enable();

        let mut config = match loader.load() {
            Ok(config) => config,
            Err(e) => {
                error!("Unable to load trace agent config: {e}");
                return;
            }
        };

        let cancel = CancellationToken::new();
        config.hostname = String::new();
        config.synchronous_flushing = true;

        let span_modifier = Arc::new(SpanModifier::new());
        let mut agent = Agent::new(cancel.clone(), config);
        let modifier = Arc::clone(&span_modifier);
        agent.hooks = SpanHooks {
            discard_span: Some(Arc::new(|span| filter::should_discard(Some(span)))),
            modify_span: Some(Arc::new(move |span| modifier.modify_span(span))),
        };

        let agent = Arc::new(agent);
        self.ta = Some(Arc::clone(&agent));
        self.span_modifier = Some(span_modifier);
        self.cancel = Some(cancel);

        tokio::spawn(async move {
            if let Err(e) = agent.run().await {
                error!("Error running the trace agent: {e}");
            }
        });
    }

    /// Performs a synchronous flush in the trace agent: blocks until every
    /// buffered span has been sent. No-op when inactive.
    pub async fn flush(&self) {
        if let Some(agent) = self.get() {
            agent.flush_sync().await;
        }
    }

    /// Returns the trace agent instance, or None when inactive.
    pub fn get(&self) -> Option<Arc<Agent>> {
        self.ta.clone()
    }

    /// Sets the tags on the trace agent config and span modifier, replacing
    /// any previously set tags as a whole.
    pub fn set_tags(&self, tag_map: HashMap<String, String>) {
        match (&self.ta, &self.span_modifier) {
            (Some(agent), Some(span_modifier)) => {
                agent.set_global_tags_unsafe(tag_map.clone());
                span_modifier.set_tags(tag_map);
            }
            _ => {
                debug!("could not set tags as the trace agent has not been initialized");
            }
        }
    }

    /// Signals the background task to stop. Never waits for it to exit;
    /// repeated calls are safe.
    pub fn stop(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }

    /// The serverless-mode handle this controller flags at start.
    pub fn mode(&self) -> &ServerlessMode {
        &self.mode
    }
}

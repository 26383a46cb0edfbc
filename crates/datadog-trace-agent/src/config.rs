// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use tracing::warn;

const DEFAULT_SITE: &str = "datadoghq.com";
const DEFAULT_RECEIVER_PORT: u16 = 8126;
const DEFAULT_TRACE_FLUSH_INTERVAL_SECS: u64 = 3;
const DEFAULT_FLUSH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024; // 10MB in Bytes

/// Intake endpoint paired with the API key used to authenticate against it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Endpoint {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Invalid config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Trace agent configuration.
///
/// Produced by [`Config::from_file`] (YAML file merged with `DD_*`
/// environment overrides) or assembled directly in tests. Embedders running
/// in serverless mode clear `hostname` and set `synchronous_flushing` before
/// handing the config to the agent.
#[derive(Clone, Debug)]
pub struct Config {
    /// Hostname reported on outgoing payloads. Empty disables hostname
    /// reporting entirely.
    pub hostname: String,
    /// When set, traces are flushed only on explicit flush requests; the
    /// timer-based flush loop is disabled.
    pub synchronous_flushing: bool,
    pub site: String,
    /// Local TCP port the trace receiver binds on. Port 0 requests an
    /// OS-assigned ephemeral port.
    pub receiver_port: u16,
    pub max_request_content_length: usize,
    /// how often to flush traces, in seconds (timer mode only)
    pub trace_flush_interval_secs: u64,
    /// per-request timeout when sending to the intake, in seconds
    pub flush_timeout_secs: u64,
    pub trace_intake: Endpoint,
    pub proxy_url: Option<String>,
    pub tags: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hostname: String::new(),
            synchronous_flushing: false,
            site: DEFAULT_SITE.to_string(),
            receiver_port: DEFAULT_RECEIVER_PORT,
            max_request_content_length: DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
            trace_flush_interval_secs: DEFAULT_TRACE_FLUSH_INTERVAL_SECS,
            flush_timeout_secs: DEFAULT_FLUSH_TIMEOUT_SECS,
            trace_intake: Endpoint {
                url: trace_intake_url(DEFAULT_SITE),
                api_key: None,
            },
            proxy_url: None,
            tags: HashMap::new(),
        }
    }
}

/// Subset of the fields in a `datadog.yaml` file this agent understands.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct YamlConfig {
    site: Option<String>,
    api_key: Option<String>,
    hostname: Option<String>,
    tags: HashMap<String, String>,
    apm_config: ApmYamlConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApmYamlConfig {
    receiver_port: Option<u16>,
    trace_flush_interval: Option<u64>,
    flush_timeout: Option<u64>,
}

fn trace_intake_url(site: &str) -> String {
    format!("https://trace.agent.{site}/api/v0.2/traces")
}

fn trace_intake_url_prefixed(prefix: &str) -> String {
    format!("{prefix}/api/v0.2/traces")
}

/// Determines the hostname to report on payloads, checking in order:
/// `DD_HOSTNAME`, `HOSTNAME`, the system hostname, then "unknown".
fn detect_hostname() -> String {
    if let Ok(hostname) = env::var("DD_HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }
    match nix::unistd::gethostname() {
        Ok(hostname_osstr) => {
            if let Some(hostname_str) = hostname_osstr.to_str() {
                if !hostname_str.is_empty() {
                    return hostname_str.to_string();
                }
            }
        }
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
        }
    }
    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

impl Config {
    /// Loads the config from a YAML file, then applies `DD_*` environment
    /// overrides.
    ///
    /// A missing or unparsable file is an error; the caller decides whether
    /// that is fatal. `resolve_hostname` gates the system hostname lookup,
    /// which serverless embedders skip to save startup latency.
    pub fn from_file(path: &Path, resolve_hostname: bool) -> Result<Config, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Unreadable {
                path: path.display().to_string(),
                reason: "no such file".to_string(),
            });
        }

        let yaml: YamlConfig = Figment::new()
            .merge(Yaml::file(path))
            .extract()
            .map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut config = Config::default();

        if let Some(site) = yaml.site {
            if !site.trim().is_empty() {
                config.site = site.trim().to_string();
            }
        }
        if let Some(port) = yaml.apm_config.receiver_port {
            config.receiver_port = port;
        }
        if let Some(interval) = yaml.apm_config.trace_flush_interval {
            config.trace_flush_interval_secs = interval;
        }
        if let Some(timeout) = yaml.apm_config.flush_timeout {
            config.flush_timeout_secs = timeout;
        }
        config.tags = yaml.tags;

        // Environment variables win over the file.
        if let Ok(site) = env::var("DD_SITE") {
            if !site.trim().is_empty() {
                config.site = site.trim().to_string();
            }
        }
        if let Some(port) = env::var("DD_APM_RECEIVER_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
        {
            config.receiver_port = port;
        }

        let api_key = env::var("DD_API_KEY").ok().or(yaml.api_key);

        // construct the trace intake url based on the site (to flush traces
        // to). DD_APM_DD_URL overrides the entire intake url prefix and is
        // primarily used for integration tests.
        let mut intake_url = trace_intake_url(&config.site);
        if let Ok(endpoint_prefix) = env::var("DD_APM_DD_URL") {
            intake_url = trace_intake_url_prefixed(&endpoint_prefix);
        }
        config.trace_intake = Endpoint {
            url: intake_url,
            api_key,
        };

        config.proxy_url = env::var("DD_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();

        config.hostname = match yaml.hostname {
            Some(hostname) if !hostname.is_empty() => hostname,
            _ if resolve_hostname => detect_hostname(),
            _ => String::new(),
        };

        Ok(config)
    }
}

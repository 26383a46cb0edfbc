// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that can occur when running the trace agent
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Startup error: {0}")]
    StartupError(String),

    #[error("Agent is already running. Cannot run again.")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

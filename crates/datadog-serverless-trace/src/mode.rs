// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle indicating whether the process runs in serverless mode.
///
/// Constructed once at startup and cloned into any collaborator that needs
/// to know the mode; the config loader skips hostname resolution when it is
/// enabled, which saves noticeable startup latency in a function host.
/// Enablement is one-way: once set, the flag stays set for the process
/// lifetime.
#[derive(Clone, Debug, Default)]
pub struct ServerlessMode {
    enabled: Arc<AtomicBool>,
}

impl ServerlessMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

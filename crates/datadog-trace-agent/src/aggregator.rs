// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffers trace payloads between the receiver and the flusher, batching
//! them under the intake's maximum payload size.

use crate::pb::TracerPayload;
use std::collections::VecDeque;
use tracing::warn;

/// Maximum content size per payload uncompressed in bytes that the Datadog
/// Trace API accepts. The value is 3.2 MB.
pub(crate) const MAX_CONTENT_SIZE_BYTES: usize = 3_200_000;

/// Maximum number of trace payloads that can be queued before the oldest
/// payloads are evicted.
pub(crate) const MAX_QUEUE_ITEMS: usize = 10_000;

/// A tracer payload bundled with its uncompressed size in bytes, used for
/// batch size calculations.
pub struct PayloadInfo {
    pub payload: TracerPayload,
    pub size: usize,
}

impl PayloadInfo {
    pub fn new(payload: TracerPayload, size: usize) -> Self {
        Self { payload, size }
    }
}

/// Aggregates individual trace payloads into batches for forwarding.
///
/// Payloads are queued FIFO; `get_batch` pulls payloads until the next one
/// would push the batch over the size limit. When the queue is full the
/// oldest payload is dropped.
#[allow(clippy::module_name_repetitions)]
pub struct TraceAggregator {
    queue: VecDeque<PayloadInfo>,
    max_content_size_bytes: usize,
    max_queue_items: usize,
    buffer: Vec<TracerPayload>,
}

impl Default for TraceAggregator {
    fn default() -> Self {
        TraceAggregator {
            queue: VecDeque::new(),
            max_content_size_bytes: MAX_CONTENT_SIZE_BYTES,
            max_queue_items: MAX_QUEUE_ITEMS,
            buffer: Vec::new(),
        }
    }
}

impl TraceAggregator {
    #[allow(clippy::must_use_candidate)]
    pub fn new(max_content_size_bytes: usize) -> Self {
        TraceAggregator {
            queue: VecDeque::new(),
            max_content_size_bytes,
            max_queue_items: MAX_QUEUE_ITEMS,
            buffer: Vec::new(),
        }
    }

    #[allow(clippy::must_use_candidate)]
    pub fn with_limits(max_content_size_bytes: usize, max_queue_items: usize) -> Self {
        TraceAggregator {
            queue: VecDeque::new(),
            max_content_size_bytes,
            max_queue_items,
            buffer: Vec::new(),
        }
    }

    /// Adds a payload to the queue, evicting the oldest entry when full.
    pub fn add(&mut self, payload_info: PayloadInfo) {
        if self.queue.len() >= self.max_queue_items {
            if let Some(evicted) = self.queue.pop_front() {
                warn!(
                    "Trace aggregator queue full ({} items), dropping oldest trace payload (size: {} bytes)",
                    self.max_queue_items, evicted.size
                );
            }
        }
        self.queue.push_back(payload_info);
    }

    /// Returns the next batch of payloads, bounded by the max content size.
    /// A payload larger than the limit on its own is returned alone.
    pub fn get_batch(&mut self) -> Vec<TracerPayload> {
        let mut batch_size = 0;

        while batch_size < self.max_content_size_bytes {
            if let Some(payload_info) = self.queue.pop_front() {
                let payload_size = payload_info.size;

                if !self.buffer.is_empty()
                    && batch_size + payload_size > self.max_content_size_bytes
                {
                    // Put the payload back at the front for the next batch
                    self.queue.push_front(payload_info);
                    break;
                }
                batch_size += payload_size;
                self.buffer.push(payload_info.payload);
            } else {
                break;
            }
        }

        std::mem::take(&mut self.buffer)
    }

    /// True when no payloads are buffered.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Discards all buffered payloads.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

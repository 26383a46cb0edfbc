// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-span hook slots consulted by the trace receiver.
//!
//! Embedders install these between constructing an [`crate::agent::Agent`]
//! and calling its run loop. The discard predicate is consulted for every
//! received span before it is admitted into the pipeline; the mutation hook
//! runs on every admitted span.

use crate::pb;
use std::sync::Arc;

/// Predicate deciding whether a received span is dropped before admission.
pub type DiscardSpanFn = Arc<dyn Fn(&pb::Span) -> bool + Send + Sync>;

/// Mutation applied to every admitted span.
pub type ModifySpanFn = Arc<dyn Fn(&mut pb::Span) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SpanHooks {
    pub discard_span: Option<DiscardSpanFn>,
    pub modify_span: Option<ModifySpanFn>,
}

impl SpanHooks {
    /// True if the span should be dropped. Spans are kept when no predicate
    /// is installed.
    pub fn should_discard(&self, span: &pb::Span) -> bool {
        match &self.discard_span {
            Some(discard) => discard(span),
            None => false,
        }
    }

    /// Applies the mutation hook, if installed.
    pub fn apply_modify(&self, span: &mut pb::Span) {
        if let Some(modify) = &self.modify_span {
            modify(span);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_hooks_keeps_spans_untouched() {
        let hooks = SpanHooks::default();
        let mut span = pb::Span::default();
        assert!(!hooks.should_discard(&span));
        hooks.apply_modify(&mut span);
        assert_eq!(span, pb::Span::default());
    }

    #[test]
    fn test_hooks_are_consulted() {
        let mut hooks = SpanHooks::default();
        hooks.discard_span = Some(Arc::new(|span| span.resource == "drop-me"));
        hooks.modify_span = Some(Arc::new(|span| {
            span.meta.insert("stamped".to_string(), "yes".to_string());
        }));

        let dropped = pb::Span {
            resource: "drop-me".to_string(),
            ..pb::Span::default()
        };
        assert!(hooks.should_discard(&dropped));

        let mut kept = pb::Span::default();
        assert!(!hooks.should_discard(&kept));
        hooks.apply_modify(&mut kept);
        assert_eq!(kept.meta.get("stamped").map(String::as_str), Some("yes"));
    }
}

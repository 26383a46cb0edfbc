// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_trace_agent::pb;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Stamps process-wide tags onto every admitted span.
///
/// The tag set is replaced as a whole on every [`SpanModifier::set_tags`]
/// call (last write wins, never merged) while the agent may be mutating
/// spans concurrently. Publication is an immutable-snapshot swap: a reader
/// sees either the previous set or the new set in full, never a mix.
#[derive(Debug, Default)]
pub struct SpanModifier {
    tags: RwLock<Arc<HashMap<String, String>>>,
}

impl SpanModifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tag set with `tags` as a whole.
    pub fn set_tags(&self, tags: HashMap<String, String>) {
        let snapshot = Arc::new(tags);
        match self.tags.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Stamps the current tag set onto the span's meta, adding or
    /// overwriting keys. Keys not present in the tag set are left alone.
    pub fn modify_span(&self, span: &mut pb::Span) {
        let snapshot = match self.tags.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        for (key, value) in snapshot.iter() {
            span.meta.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_stamps_tags_onto_span_meta() {
        let modifier = SpanModifier::new();
        modifier.set_tags(tags(&[("env", "prod")]));

        let mut span = pb::Span::default();
        modifier.modify_span(&mut span);
        assert_eq!(span.meta.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_overwrites_existing_keys_and_keeps_foreign_ones() {
        let modifier = SpanModifier::new();
        modifier.set_tags(tags(&[("env", "prod")]));

        let mut span = pb::Span::default();
        span.meta.insert("env".to_string(), "staging".to_string());
        span.meta
            .insert("http.url".to_string(), "https://example.com/".to_string());

        modifier.modify_span(&mut span);
        assert_eq!(span.meta.get("env").map(String::as_str), Some("prod"));
        assert_eq!(
            span.meta.get("http.url").map(String::as_str),
            Some("https://example.com/")
        );
    }

    #[test]
    fn test_replacement_is_not_a_merge() {
        let modifier = SpanModifier::new();

        modifier.set_tags(tags(&[("env", "prod")]));
        let mut first = pb::Span::default();
        modifier.modify_span(&mut first);

        modifier.set_tags(tags(&[("team", "x")]));
        let mut second = pb::Span::default();
        modifier.modify_span(&mut second);

        // The new set applies in full to later spans only; spans already
        // mutated under the prior set keep their stamps.
        assert_eq!(second.meta.get("team").map(String::as_str), Some("x"));
        assert!(!second.meta.contains_key("env"));
        assert_eq!(first.meta.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_empty_set_stamps_nothing() {
        let modifier = SpanModifier::new();
        let mut span = pb::Span::default();
        modifier.modify_span(&mut span);
        assert!(span.meta.is_empty());
    }

    #[test]
    fn test_concurrent_replacement_never_tears() {
        let modifier = Arc::new(SpanModifier::new());
        modifier.set_tags(tags(&[("a", "1"), ("b", "1")]));

        let writer = {
            let modifier = Arc::clone(&modifier);
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    modifier.set_tags(tags(&[("a", "1"), ("b", "1")]));
                    modifier.set_tags(tags(&[("a", "2"), ("b", "2")]));
                }
            })
        };

        for _ in 0..1_000 {
            let mut span = pb::Span::default();
            modifier.modify_span(&mut span);
            // Either snapshot in full, never a mix of the two.
            assert_eq!(span.meta.get("a"), span.meta.get("b"));
        }

        writer.join().unwrap();
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Table and column pattern matching
//!
//! Patterns are case-insensitive. A `*` inside a segment matches any run of
//! characters within that segment only; table patterns never match across
//! segments.

use std::collections::HashMap;

use parking_lot::RwLock;
use regex::Regex;

/// Matches qualified table names and column names against policy patterns
#[derive(Debug, Default)]
pub struct PolicyMatcher {
    /// Compiled segment patterns, keyed by the raw pattern text
    pattern_cache: RwLock<HashMap<String, Regex>>,
}

impl PolicyMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pattern and subject must have the same number of segments
    pub fn matches_table<P, S>(&self, pattern: &[P], subject: &[S]) -> bool
    where
        P: AsRef<str>,
        S: AsRef<str>,
    {
        if pattern.is_empty() || pattern.len() != subject.len() {
            return false;
        }
        pattern
            .iter()
            .zip(subject)
            .all(|(p, s)| self.matches_segment(p.as_ref(), s.as_ref()))
    }

    pub fn matches_column(&self, pattern: &str, column: &str) -> bool {
        self.matches_segment(pattern, column)
    }

    /// True when any of the patterns matches the column
    pub fn matches_any_column<P: AsRef<str>>(&self, patterns: &[P], column: &str) -> bool {
        patterns
            .iter()
            .any(|p| self.matches_column(p.as_ref(), column))
    }

    /// Number of compiled patterns held in the cache
    pub fn cached_patterns(&self) -> usize {
        self.pattern_cache.read().len()
    }

    fn matches_segment(&self, pattern: &str, subject: &str) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() || subject.is_empty() {
            return false;
        }
        if pattern == "*" {
            return true;
        }
        if !pattern.contains('*') {
            return pattern.eq_ignore_ascii_case(subject);
        }

        if let Some(regex) = self.pattern_cache.read().get(pattern) {
            return regex.is_match(subject);
        }

        let source = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        match Regex::new(&format!("(?i)^{source}$")) {
            Ok(regex) => {
                let matched = regex.is_match(subject);
                self.pattern_cache.write().insert(pattern.to_string(), regex);
                matched
            }
            Err(e) => {
                tracing::warn!("Invalid policy pattern '{}': {}", pattern, e);
                false
            }
        }
    }
}

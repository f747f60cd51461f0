//! Pattern extractor reducing experiment results to high-confidence insights
//!
//! The extractor is a pure function of its inputs and thresholds: filter
//! results that pass both quality scores, group the survivors by a
//! similarity key, aggregate a confidence per group, and keep the best
//! groups up to a cap. The grouping key is an extension point: the default
//! derives a normalized prefix from the reference output, and callers can
//! inject their own key function (e.g. an embedding-cluster label) through
//! the builder.
//!
//! # Example
//!
//! ```rust
//! use quarry_core::patterns::{PatternExtractor, PatternThresholds};
//!
//! let extractor = PatternExtractor::builder()
//!     .thresholds(PatternThresholds::default())
//!     .build();
//! let patterns = extractor.extract(&[]);
//! assert!(patterns.is_empty());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use quarry_domain::{ExperimentResult, ExtractedPattern};

type KeyFn = dyn Fn(&ExperimentResult) -> String + Send + Sync;

/// Scoring thresholds applied during extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternThresholds {
    /// Minimum QA correctness score a result must reach
    pub qa_threshold: f64,
    /// Minimum RAG relevance score a result must reach
    pub rag_threshold: f64,
    /// Minimum aggregate confidence a group must reach
    pub confidence_threshold: f64,
    /// Maximum number of patterns returned per experiment
    pub max_patterns: usize,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self { qa_threshold: 0.7, rag_threshold: 0.7, confidence_threshold: 0.75, max_patterns: 10 }
    }
}

impl PatternThresholds {
    /// Validate threshold ranges.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("qa_threshold", self.qa_threshold),
            ("rag_threshold", self.rag_threshold),
            ("confidence_threshold", self.confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.max_patterns == 0 {
            return Err("max_patterns must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Groups qualifying experiment results into a bounded set of
/// [`ExtractedPattern`] records.
#[derive(Clone)]
pub struct PatternExtractor {
    thresholds: PatternThresholds,
    key_fn: Option<Arc<KeyFn>>,
}

impl PatternExtractor {
    /// Creates a new builder for constructing a PatternExtractor
    pub fn builder() -> PatternExtractorBuilder {
        PatternExtractorBuilder::default()
    }

    /// Create an extractor with the given thresholds and the default
    /// grouping key
    pub fn new(thresholds: PatternThresholds) -> Self {
        Self { thresholds, key_fn: None }
    }

    /// Extract patterns from a slice of experiment results.
    ///
    /// Output is ordered by descending confidence; ties break toward the
    /// group containing the earliest example id. At most
    /// `thresholds.max_patterns` entries are returned.
    pub fn extract(&self, results: &[ExperimentResult]) -> Vec<ExtractedPattern> {
        let qualifying = results.iter().filter(|r| {
            r.scores.qa_correctness >= self.thresholds.qa_threshold
                && r.scores.rag_relevance >= self.thresholds.rag_threshold
        });

        // Group survivors by similarity key, keeping each group's members in
        // input order.
        let mut groups: HashMap<String, Vec<&ExperimentResult>> = HashMap::new();
        for result in qualifying {
            groups.entry(self.group_key(result)).or_default().push(result);
        }

        let mut patterns: Vec<ExtractedPattern> = groups
            .into_iter()
            .filter_map(|(category, members)| self.build_pattern(category, &members))
            .collect();

        patterns.sort_by(|a, b| {
            b.confidence_score
                .total_cmp(&a.confidence_score)
                .then_with(|| earliest_id(a).cmp(earliest_id(b)))
        });
        patterns.truncate(self.thresholds.max_patterns);
        patterns
    }

    fn build_pattern(
        &self,
        category: String,
        members: &[&ExperimentResult],
    ) -> Option<ExtractedPattern> {
        if members.is_empty() {
            return None;
        }

        let confidence: f64 =
            members.iter().map(|r| r.scores.confidence).sum::<f64>() / members.len() as f64;
        if confidence < self.thresholds.confidence_threshold {
            return None;
        }

        let representative = members
            .iter()
            .min_by(|a, b| a.example_id.cmp(&b.example_id))
            .map(|r| r.reference_output.clone())?;

        let mut supporting: Vec<String> =
            members.iter().map(|r| r.example_id.clone()).collect();
        supporting.sort();
        supporting.dedup();

        Some(ExtractedPattern {
            pattern_text: representative,
            confidence_score: confidence,
            supporting_example_ids: supporting,
            category,
        })
    }

    fn group_key(&self, result: &ExperimentResult) -> String {
        match &self.key_fn {
            Some(key_fn) => key_fn(result),
            None => default_group_key(result),
        }
    }
}

/// Default similarity key: a normalized prefix of the reference output.
///
/// Lowercases, strips non-alphanumeric characters, and keeps the first
/// eight tokens (capped at 64 chars) so lexically similar answers land in
/// the same group.
fn default_group_key(result: &ExperimentResult) -> String {
    let normalized: String = result
        .reference_output
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut key = normalized.split_whitespace().take(8).collect::<Vec<_>>().join(" ");
    key.truncate(64);
    key
}

fn earliest_id(pattern: &ExtractedPattern) -> &str {
    pattern.supporting_example_ids.first().map(String::as_str).unwrap_or_default()
}

/// Builder for [`PatternExtractor`]
#[derive(Default)]
pub struct PatternExtractorBuilder {
    thresholds: Option<PatternThresholds>,
    key_fn: Option<Arc<KeyFn>>,
}

impl PatternExtractorBuilder {
    /// Set the scoring thresholds
    pub fn thresholds(mut self, thresholds: PatternThresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    /// Set a custom grouping key function
    pub fn group_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExperimentResult) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(f));
        self
    }

    /// Build the PatternExtractor
    pub fn build(self) -> PatternExtractor {
        PatternExtractor {
            thresholds: self.thresholds.unwrap_or_default(),
            key_fn: self.key_fn,
        }
    }
}

//! Domain types and models
//!
//! Experiment, dataset, and pattern records fetched from the remote
//! experimentation service, plus the sync bookkeeping types owned by the
//! batch engine. Remote records are read-only snapshots: they are never
//! mutated locally and live only for the duration of a sync run.

pub mod sync;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Re-export sync bookkeeping types for convenience
pub use sync::{BatchSyncResult, DatasetSyncReport, SyncErrorRecord, SyncState, SyncStatus};

// ============================================================================
// Remote Experiment Records
// ============================================================================

/// An experiment registered on the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub dataset_id: String,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    /// Number of repetitions each example was evaluated with
    pub repetitions: u32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Evaluation scores attached to one experiment result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultScores {
    pub qa_correctness: f64,
    pub rag_relevance: f64,
    pub confidence: f64,
}

/// A document returned by retrieval for one example.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub relevance: Option<f64>,
}

/// One evaluated example from an experiment run.
///
/// Belongs to exactly one experiment (via example id and repetition);
/// immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub example_id: String,
    pub repetition_number: u32,
    pub input: String,
    pub reference_output: String,
    pub scores: ResultScores,
    #[serde(default)]
    pub retrieved_context: Vec<RetrievedDocument>,
    pub latency_ms: u64,
    #[serde(default)]
    pub trace_id: Option<String>,
}

/// A dataset registered on the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    /// Number of examples in the dataset
    pub size: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Aggregate statistics computed server-side for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetAnalysis {
    pub dataset_id: String,
    pub result_count: u64,
    pub mean_qa_correctness: f64,
    pub mean_rag_relevance: f64,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Derived Patterns
// ============================================================================

/// A derived, non-authoritative insight aggregated from experiment results
/// that passed the quality thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPattern {
    pub pattern_text: String,
    pub confidence_score: f64,
    pub supporting_example_ids: Vec<String>,
    pub category: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_result_round_trips_through_json() {
        let result = ExperimentResult {
            example_id: "ex-1".to_string(),
            repetition_number: 2,
            input: "what is the refund policy?".to_string(),
            reference_output: "Refunds are processed within 14 days.".to_string(),
            scores: ResultScores { qa_correctness: 0.92, rag_relevance: 0.88, confidence: 0.9 },
            retrieved_context: vec![RetrievedDocument {
                content: "Refund policy: 14 days".to_string(),
                source: Some("kb/policies.md".to_string()),
                relevance: Some(0.91),
            }],
            latency_ms: 840,
            trace_id: Some("trace-abc".to_string()),
        };

        let json = serde_json::to_string(&result).expect("serializes");
        let back: ExperimentResult = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back.example_id, "ex-1");
        assert_eq!(back.scores.qa_correctness, 0.92);
        assert_eq!(back.retrieved_context.len(), 1);
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let json = r#"{
            "example_id": "ex-2",
            "repetition_number": 1,
            "input": "q",
            "reference_output": "a",
            "scores": {"qa_correctness": 0.5, "rag_relevance": 0.5, "confidence": 0.5},
            "latency_ms": 10
        }"#;

        let result: ExperimentResult = serde_json::from_str(json).expect("deserializes");
        assert!(result.retrieved_context.is_empty());
        assert!(result.trace_id.is_none());
    }
}

//! Pattern extraction from experiment results

pub mod extractor;

pub use extractor::{PatternExtractor, PatternExtractorBuilder, PatternThresholds};

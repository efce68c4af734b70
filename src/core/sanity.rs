//! Spot-check of a freshly trained classifier against held-out recordings.

use crate::collector::types::ActivityLabel;
use crate::core::codec::{argmax, LabelCodec};
use crate::core::dataset::{load_window, test_file, DataError};
use crate::model::WindowClassifier;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Labels that have a test recording.
pub const SANITY_LABELS: [ActivityLabel; 3] = [
    ActivityLabel::Idle,
    ActivityLabel::InHand,
    ActivityLabel::PocketSitting,
];

/// Verdict for one test recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SanityResult {
    pub expected: ActivityLabel,
    pub predicted: ActivityLabel,
    /// Probability assigned to `predicted`
    pub confidence: f64,
}

impl SanityResult {
    pub fn passed(&self) -> bool {
        self.expected == self.predicted
    }
}

/// Classify the first window of each test recording and log the verdicts.
///
/// Mismatches are reported, not treated as failures; only unreadable
/// recordings are errors.
pub fn run_sanity_check<C: WindowClassifier>(
    classifier: &C,
    codec: &LabelCodec,
    test_dir: &Path,
) -> Result<Vec<SanityResult>, DataError> {
    let mut results = Vec::with_capacity(SANITY_LABELS.len());

    for expected in SANITY_LABELS {
        let window = load_window(&test_file(test_dir, expected))?;
        let probabilities = classifier.predict_window(&window);
        let predicted = codec.decode(probabilities.view());
        let confidence = probabilities[argmax(probabilities.view())];

        info!("expected   : {expected}");
        info!("prediction : {predicted} ({confidence:.3})");

        let result = SanityResult {
            expected,
            predicted,
            confidence,
        };
        if !result.passed() {
            warn!(expected = %expected, predicted = %predicted, "sanity check mismatch");
        }
        results.push(result);
    }

    Ok(results)
}

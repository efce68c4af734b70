//! One-hot encoding of activity labels.
//!
//! Column order is pinned to [`ActivityLabel::ALL`], which is also the
//! sorted order of the label strings. Decoding takes the arg-max of a
//! probability vector.

use crate::collector::types::ActivityLabel;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::collections::BTreeSet;
use tracing::warn;

/// Maps labels to one-hot vectors and classifier outputs back to labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCodec {
    categories: Vec<ActivityLabel>,
}

impl LabelCodec {
    /// Codec over the full label set.
    pub fn new() -> Self {
        Self {
            categories: ActivityLabel::ALL.to_vec(),
        }
    }

    /// Fit the codec to the label column of a training set.
    ///
    /// The column layout is always the full label set so the classifier's
    /// output width never depends on which recordings were long enough to
    /// window; labels missing from the data are reported.
    pub fn fit(labels: &[ActivityLabel]) -> Self {
        let observed: BTreeSet<ActivityLabel> = labels.iter().copied().collect();
        for label in ActivityLabel::ALL {
            if !observed.contains(&label) {
                warn!(label = %label, "no training windows for label; it can still be predicted but was never learned");
            }
        }
        Self::new()
    }

    /// Labels in column order.
    pub fn categories(&self) -> &[ActivityLabel] {
        &self.categories
    }

    /// Width of an encoded vector.
    pub fn width(&self) -> usize {
        self.categories.len()
    }

    pub fn encode(&self, label: ActivityLabel) -> Array1<f64> {
        let mut encoded = Array1::zeros(self.width());
        if let Some(column) = self.column(label) {
            encoded[column] = 1.0;
        }
        encoded
    }

    /// Encode a label column into a `(labels.len(), width)` target matrix.
    pub fn encode_batch(&self, labels: &[ActivityLabel]) -> Array2<f64> {
        let mut encoded = Array2::zeros((labels.len(), self.width()));
        for (row, label) in labels.iter().enumerate() {
            if let Some(column) = self.column(*label) {
                encoded[[row, column]] = 1.0;
            }
        }
        encoded
    }

    /// Label of the highest-scoring column.
    ///
    /// Ties resolve to the earliest column. An empty vector decodes to the
    /// first category.
    pub fn decode(&self, encoded: ArrayView1<'_, f64>) -> ActivityLabel {
        let column = argmax(encoded);
        self.categories
            .get(column)
            .copied()
            .unwrap_or(self.categories[0])
    }

    /// Decode every row of a `(n, width)` matrix.
    pub fn decode_batch(&self, encoded: ArrayView2<'_, f64>) -> Vec<ActivityLabel> {
        encoded.rows().into_iter().map(|row| self.decode(row)).collect()
    }

    fn column(&self, label: ActivityLabel) -> Option<usize> {
        self.categories.iter().position(|c| *c == label)
    }
}

impl Default for LabelCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the largest value (first one on ties, 0 when empty).
pub fn argmax(values: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &value) in values.iter().enumerate() {
        if value > best_value {
            best = i;
            best_value = value;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_round_trip_all_labels() {
        let codec = LabelCodec::new();
        for label in ActivityLabel::ALL {
            assert_eq!(codec.decode(codec.encode(label).view()), label);
        }
    }

    #[test]
    fn test_encode_is_one_hot() {
        let codec = LabelCodec::new();
        let encoded = codec.encode(ActivityLabel::PocketMoving);
        assert_eq!(encoded, array![0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_decode_probabilities() {
        let codec = LabelCodec::new();
        let probs = array![0.05, 0.1, 0.05, 0.7, 0.1];
        assert_eq!(codec.decode(probs.view()), ActivityLabel::PocketSitting);
    }

    #[test]
    fn test_batch_encode_decode() {
        let codec = LabelCodec::fit(&[ActivityLabel::Idle, ActivityLabel::Running]);
        let labels = vec![
            ActivityLabel::Running,
            ActivityLabel::Idle,
            ActivityLabel::InHand,
        ];

        let encoded = codec.encode_batch(&labels);
        assert_eq!(encoded.dim(), (3, 5));
        assert_eq!(encoded.row(0).sum(), 1.0);
        assert_eq!(codec.decode_batch(encoded.view()), labels);
    }

    #[test]
    fn test_fit_keeps_full_width() {
        let codec = LabelCodec::fit(&[ActivityLabel::Idle]);
        assert_eq!(codec.width(), 5);
        assert_eq!(codec.categories(), &ActivityLabel::ALL);
    }

    #[test]
    fn test_argmax_ties_pick_first() {
        assert_eq!(argmax(array![0.2, 0.4, 0.4].view()), 1);
        assert_eq!(argmax(Array1::<f64>::zeros(0).view()), 0);
    }
}

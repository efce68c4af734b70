//! Sequence classifier for sensor windows.
//!
//! # Architecture
//!
//! ```text
//!  window (40 × 6)
//!       │
//!   ┌───┴──────────┐
//!   ▼              ▼
//! LSTM →        ← LSTM        64 units each, final states concatenated
//!   └───┬──────────┘
//!       ▼
//!  Dropout (0.5, training only)
//!       ▼
//!  Dense 64, ReLU
//!       ▼
//!  Dense 5, softmax          probability per activity label
//! ```
//!
//! Training is plain mini-batch Adam on categorical cross-entropy, visiting
//! the windows in dataset order every epoch. The trained weights are only
//! ever read afterwards: [`train`] hands back a [`TrainedClassifier`] that
//! exposes prediction and nothing else.

pub mod layers;
pub mod lstm;
pub mod optimizer;

use crate::collector::types::{ActivityLabel, CHANNELS};
use crate::core::codec::{argmax, LabelCodec};
use crate::core::dataset::TrainingSet;
use crate::core::windowing::Window;
use layers::{
    cross_entropy, dropout_mask, relu, relu_backward, softmax, softmax_cross_entropy_backward,
    Dense,
};
use lstm::{Lstm, LstmCache};
use ndarray::{concatenate, s, Array2, ArrayView2, ArrayView3, Axis};
use optimizer::Adam;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Anything that maps a batch of windows to label probabilities.
pub trait WindowClassifier {
    /// `(batch, steps, CHANNELS)` → `(batch, labels)` probabilities.
    fn predict(&self, windows: ArrayView3<'_, f64>) -> Array2<f64>;

    /// Probabilities for a single window (wrapped into a batch of one).
    fn predict_window(&self, window: &Window) -> ndarray::Array1<f64> {
        let batch = window.view().insert_axis(Axis(0));
        self.predict(batch).row(0).to_owned()
    }
}

/// Architecture and training hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Units in each direction of the recurrent layer
    pub recurrent_units: usize,
    /// Units in the hidden dense layer
    pub dense_units: usize,
    /// Fraction of recurrent features dropped while training
    pub dropout: f64,
    /// Full passes over the training set
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seed for weight initialisation and dropout
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            recurrent_units: 64,
            dense_units: 64,
            dropout: 0.5,
            epochs: 25,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.recurrent_units == 0 || self.dense_units == 0 {
            return Err(TrainingError::InvalidConfig(
                "layer widths must be non-zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainingError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig(
                "batch size must be non-zero".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Training could not run.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid classifier configuration: {0}")]
    InvalidConfig(String),

    #[error("inputs hold {inputs} windows but targets hold {targets}")]
    ShapeMismatch { inputs: usize, targets: usize },

    #[error("expected {expected} channels per sample, got {found}")]
    ChannelMismatch { expected: usize, found: usize },

    #[error("training set is empty")]
    EmptyTrainingSet,
}

/// Loss and accuracy of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// What happened during training.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub windows: usize,
    pub parameters: usize,
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingReport {
    pub fn final_metrics(&self) -> Option<EpochMetrics> {
        self.epochs.last().copied()
    }
}

/// Forward-pass intermediates needed for back-propagation.
struct ForwardCache {
    forward: LstmCache,
    backward: LstmCache,
    /// Concatenated recurrent features before dropout
    features: Array2<f64>,
    mask: Array2<f64>,
    dropped: Array2<f64>,
    hidden_pre: Array2<f64>,
    hidden: Array2<f64>,
}

/// Bidirectional LSTM with a dense classification head.
#[derive(Debug, Clone)]
struct BiLstmNetwork {
    forward: Lstm,
    backward: Lstm,
    hidden: Dense,
    output: Dense,
    dropout: f64,
}

impl BiLstmNetwork {
    fn new<R: Rng + ?Sized>(rng: &mut R, config: &ClassifierConfig) -> Self {
        let units = config.recurrent_units;
        Self {
            forward: Lstm::new(rng, CHANNELS, units, false),
            backward: Lstm::new(rng, CHANNELS, units, true),
            hidden: Dense::new(rng, 2 * units, config.dense_units),
            output: Dense::new(rng, config.dense_units, ActivityLabel::COUNT),
            dropout: config.dropout,
        }
    }

    fn param_count(&self) -> usize {
        self.forward.param_count()
            + self.backward.param_count()
            + self.hidden.param_count()
            + self.output.param_count()
    }

    fn features(&self, x: ArrayView3<'_, f64>) -> Array2<f64> {
        let f = self.forward.forward(x);
        let b = self.backward.forward(x);
        concat_features(&f, &b)
    }

    /// Inference pass; dropout is inactive.
    fn predict(&self, x: ArrayView3<'_, f64>) -> Array2<f64> {
        let features = self.features(x);
        let hidden = relu(&self.hidden.forward(features.view()));
        softmax(&self.output.forward(hidden.view()))
    }

    fn forward_train<R: Rng + ?Sized>(
        &self,
        x: ArrayView3<'_, f64>,
        rng: &mut R,
    ) -> (Array2<f64>, ForwardCache) {
        let (f, forward) = self.forward.forward_train(x);
        let (b, backward) = self.backward.forward_train(x);
        let features = concat_features(&f, &b);

        let mask = dropout_mask(rng, features.dim(), self.dropout);
        let dropped = &features * &mask;
        let hidden_pre = self.hidden.forward(dropped.view());
        let hidden = relu(&hidden_pre);
        let probs = softmax(&self.output.forward(hidden.view()));

        let cache = ForwardCache {
            forward,
            backward,
            features,
            mask,
            dropped,
            hidden_pre,
            hidden,
        };
        (probs, cache)
    }

    fn backward(
        &mut self,
        x: ArrayView3<'_, f64>,
        cache: &ForwardCache,
        probs: &Array2<f64>,
        targets: ArrayView2<'_, f64>,
    ) {
        let d_logits = softmax_cross_entropy_backward(probs, targets);
        let d_hidden = self.output.backward(cache.hidden.view(), d_logits.view());
        let d_hidden_pre = relu_backward(&cache.hidden_pre, &d_hidden);
        let d_dropped = self.hidden.backward(cache.dropped.view(), d_hidden_pre.view());
        let d_features = d_dropped * &cache.mask;

        let units = self.forward.hidden();
        debug_assert_eq!(cache.features.ncols(), 2 * units);
        let d_forward = d_features.slice(s![.., 0..units]).to_owned();
        let d_backward = d_features.slice(s![.., units..2 * units]).to_owned();

        self.forward.backward(x, &cache.forward, &d_forward);
        self.backward.backward(x, &cache.backward, &d_backward);
    }

    fn zero_grad(&mut self) {
        self.forward.zero_grad();
        self.backward.zero_grad();
        self.hidden.zero_grad();
        self.output.zero_grad();
    }

    fn apply(&mut self, adam: &Adam) {
        self.forward.apply(adam);
        self.backward.apply(adam);
        self.hidden.apply(adam);
        self.output.apply(adam);
    }
}

fn concat_features(forward: &Array2<f64>, backward: &Array2<f64>) -> Array2<f64> {
    concatenate(Axis(1), &[forward.view(), backward.view()])
        .unwrap_or_else(|_| Array2::zeros((forward.nrows(), forward.ncols() + backward.ncols())))
}

/// A classifier with fixed, trained weights.
#[derive(Debug, Clone)]
pub struct TrainedClassifier {
    network: BiLstmNetwork,
}

impl TrainedClassifier {
    pub fn param_count(&self) -> usize {
        self.network.param_count()
    }
}

impl WindowClassifier for TrainedClassifier {
    fn predict(&self, windows: ArrayView3<'_, f64>) -> Array2<f64> {
        self.network.predict(windows)
    }
}

/// Fit a new classifier.
///
/// `inputs` is `(n, steps, CHANNELS)`; `targets` is the one-hot
/// `(n, labels)` matrix from the label codec. Windows are visited in the
/// given order every epoch.
pub fn train(
    inputs: ArrayView3<'_, f64>,
    targets: ArrayView2<'_, f64>,
    config: &ClassifierConfig,
) -> Result<(TrainedClassifier, TrainingReport), TrainingError> {
    config.validate()?;

    let (n, _, channels) = inputs.dim();
    if n == 0 {
        return Err(TrainingError::EmptyTrainingSet);
    }
    if channels != CHANNELS {
        return Err(TrainingError::ChannelMismatch {
            expected: CHANNELS,
            found: channels,
        });
    }
    if targets.nrows() != n {
        return Err(TrainingError::ShapeMismatch {
            inputs: n,
            targets: targets.nrows(),
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut network = BiLstmNetwork::new(&mut rng, config);
    let mut adam = Adam::new(config.learning_rate);

    let mut report = TrainingReport {
        windows: n,
        parameters: network.param_count(),
        epochs: Vec::with_capacity(config.epochs),
    };
    info!(
        windows = n,
        parameters = report.parameters,
        epochs = config.epochs,
        "training classifier"
    );

    for epoch in 1..=config.epochs {
        let mut loss_sum = 0.0;
        let mut correct = 0usize;

        for start in (0..n).step_by(config.batch_size) {
            let end = (start + config.batch_size).min(n);
            let x = inputs.slice(s![start..end, .., ..]);
            let y = targets.slice(s![start..end, ..]);

            network.zero_grad();
            let (probs, cache) = network.forward_train(x, &mut rng);

            loss_sum += cross_entropy(&probs, y) * (end - start) as f64;
            correct += count_correct(&probs, y);

            network.backward(x, &cache, &probs, y);
            adam.tick();
            network.apply(&adam);
        }

        let metrics = EpochMetrics {
            epoch,
            loss: loss_sum / n as f64,
            accuracy: correct as f64 / n as f64,
        };
        info!(
            epoch,
            of = config.epochs,
            loss = %format!("{:.4}", metrics.loss),
            accuracy = %format!("{:.4}", metrics.accuracy),
            "epoch complete"
        );
        report.epochs.push(metrics);
    }

    debug!(steps = adam.timestep(), "optimizer finished");

    Ok((TrainedClassifier { network }, report))
}

/// Fit the label codec to a training set and train a classifier on it.
pub fn train_on_set(
    set: &TrainingSet,
    config: &ClassifierConfig,
) -> Result<(TrainedClassifier, LabelCodec, TrainingReport), TrainingError> {
    let codec = LabelCodec::fit(set.labels());
    let targets = codec.encode_batch(set.labels());
    let (classifier, report) = train(set.inputs(), targets.view(), config)?;
    Ok((classifier, codec, report))
}

fn count_correct(probs: &Array2<f64>, targets: ArrayView2<'_, f64>) -> usize {
    probs
        .rows()
        .into_iter()
        .zip(targets.rows())
        .filter(|(p, y)| argmax(p.view()) == argmax(y.view()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn tiny_config() -> ClassifierConfig {
        ClassifierConfig {
            recurrent_units: 3,
            dense_units: 4,
            dropout: 0.0,
            epochs: 1,
            batch_size: 4,
            learning_rate: 0.01,
            seed: 1,
        }
    }

    /// Windows whose channel `label index` carries a strong constant signal.
    fn separable(per_label: usize, steps: usize) -> (Array3<f64>, Vec<ActivityLabel>) {
        let n = per_label * ActivityLabel::COUNT;
        let mut labels = Vec::with_capacity(n);
        let inputs = Array3::from_shape_fn((n, steps, CHANNELS), |(w, t, c)| {
            let label = w / per_label;
            let noise = (((w * 31 + t * 7 + c * 3) % 11) as f64 - 5.0) * 0.01;
            if c == label {
                2.0 + noise
            } else {
                noise
            }
        });
        for w in 0..n {
            labels.push(ActivityLabel::ALL[w / per_label]);
        }
        (inputs, labels)
    }

    fn batch_loss(network: &BiLstmNetwork, x: ArrayView3<'_, f64>, y: ArrayView2<'_, f64>) -> f64 {
        cross_entropy(&network.predict(x), y)
    }

    #[test]
    fn test_network_gradients_match_finite_differences() {
        let config = tiny_config();
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut network = BiLstmNetwork::new(&mut rng, &config);

        let (inputs, labels) = separable(1, 6);
        let targets = LabelCodec::new().encode_batch(&labels);
        let x = inputs.view();
        let y = targets.view();

        network.zero_grad();
        let (probs, cache) = network.forward_train(x, &mut rng);
        network.backward(x, &cache, &probs, y);

        let eps = 1e-6;

        let original = network.output.weights.value[[1, 2]];
        network.output.weights.value[[1, 2]] = original + eps;
        let plus = batch_loss(&network, x, y);
        network.output.weights.value[[1, 2]] = original - eps;
        let minus = batch_loss(&network, x, y);
        network.output.weights.value[[1, 2]] = original;
        assert_relative_eq!(
            network.output.weights.grad[[1, 2]],
            (plus - minus) / (2.0 * eps),
            epsilon = 1e-6,
            max_relative = 1e-4
        );

        let original = network.hidden.weights.value[[4, 1]];
        network.hidden.weights.value[[4, 1]] = original + eps;
        let plus = batch_loss(&network, x, y);
        network.hidden.weights.value[[4, 1]] = original - eps;
        let minus = batch_loss(&network, x, y);
        network.hidden.weights.value[[4, 1]] = original;
        assert_relative_eq!(
            network.hidden.weights.grad[[4, 1]],
            (plus - minus) / (2.0 * eps),
            epsilon = 1e-6,
            max_relative = 1e-4
        );

        for (r, c) in [(0, 0), (2, 7), (5, 11)] {
            let original = network.forward.kernel.value[[r, c]];
            network.forward.kernel.value[[r, c]] = original + eps;
            let plus = batch_loss(&network, x, y);
            network.forward.kernel.value[[r, c]] = original - eps;
            let minus = batch_loss(&network, x, y);
            network.forward.kernel.value[[r, c]] = original;
            assert_relative_eq!(
                network.forward.kernel.grad[[r, c]],
                (plus - minus) / (2.0 * eps),
                epsilon = 1e-6,
                max_relative = 1e-4
            );

            let original = network.backward.kernel.value[[r, c]];
            network.backward.kernel.value[[r, c]] = original + eps;
            let plus = batch_loss(&network, x, y);
            network.backward.kernel.value[[r, c]] = original - eps;
            let minus = batch_loss(&network, x, y);
            network.backward.kernel.value[[r, c]] = original;
            assert_relative_eq!(
                network.backward.kernel.grad[[r, c]],
                (plus - minus) / (2.0 * eps),
                epsilon = 1e-6,
                max_relative = 1e-4
            );
        }
    }

    #[test]
    fn test_predict_outputs_distributions() {
        let (inputs, labels) = separable(2, 10);
        let targets = LabelCodec::new().encode_batch(&labels);
        let (classifier, report) = train(inputs.view(), targets.view(), &tiny_config()).unwrap();

        let probs = classifier.predict(inputs.view());
        assert_eq!(probs.dim(), (10, ActivityLabel::COUNT));
        for row in probs.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-9);
        }

        // Prediction is a pure function of the weights.
        assert_eq!(probs, classifier.predict(inputs.view()));
        assert_eq!(report.epochs.len(), 1);
        assert_eq!(report.parameters, classifier.param_count());
    }

    #[test]
    fn test_predict_window_wraps_single_batch() {
        let (inputs, labels) = separable(1, crate::core::windowing::WINDOW_SIZE);
        let targets = LabelCodec::new().encode_batch(&labels);
        let (classifier, _) = train(inputs.view(), targets.view(), &tiny_config()).unwrap();

        let samples: Vec<_> = (0..crate::core::windowing::WINDOW_SIZE)
            .map(|t| {
                let row = inputs.slice(s![2, t, ..]);
                let mut values = [0.0; CHANNELS];
                for (v, x) in values.iter_mut().zip(row.iter()) {
                    *v = *x;
                }
                crate::collector::types::Sample::new(values)
            })
            .collect();
        let window = Window::from_samples(&samples).unwrap();

        let single = classifier.predict_window(&window);
        let batched = classifier.predict(inputs.view());
        for (a, b) in single.iter().zip(batched.row(2).iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_training_learns_separable_windows() {
        let (inputs, labels) = separable(12, 12);
        let codec = LabelCodec::fit(&labels);
        let targets = codec.encode_batch(&labels);
        let config = ClassifierConfig {
            recurrent_units: 8,
            dense_units: 16,
            dropout: 0.2,
            epochs: 60,
            batch_size: 16,
            learning_rate: 0.01,
            seed: 7,
        };

        let (classifier, report) = train(inputs.view(), targets.view(), &config).unwrap();
        let first = report.epochs.first().unwrap();
        let last = report.final_metrics().unwrap();
        assert!(last.loss < first.loss);

        let predicted = codec.decode_batch(classifier.predict(inputs.view()).view());
        let correct = predicted.iter().zip(&labels).filter(|(p, l)| p == l).count();
        assert!(correct as f64 / labels.len() as f64 > 0.95, "accuracy {correct}/{}", labels.len());
    }

    #[test]
    fn test_training_is_reproducible() {
        let (inputs, labels) = separable(2, 8);
        let targets = LabelCodec::new().encode_batch(&labels);
        let mut config = tiny_config();
        config.dropout = 0.5;
        config.epochs = 2;

        let (a, _) = train(inputs.view(), targets.view(), &config).unwrap();
        let (b, _) = train(inputs.view(), targets.view(), &config).unwrap();
        assert_eq!(a.predict(inputs.view()), b.predict(inputs.view()));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let config = tiny_config();
        let empty = Array3::<f64>::zeros((0, 40, CHANNELS));
        let no_targets = Array2::<f64>::zeros((0, 5));
        assert!(matches!(
            train(empty.view(), no_targets.view(), &config),
            Err(TrainingError::EmptyTrainingSet)
        ));

        let inputs = Array3::<f64>::zeros((3, 40, CHANNELS));
        let targets = Array2::<f64>::zeros((2, 5));
        assert!(matches!(
            train(inputs.view(), targets.view(), &config),
            Err(TrainingError::ShapeMismatch { inputs: 3, targets: 2 })
        ));

        let narrow = Array3::<f64>::zeros((2, 40, 3));
        let targets = Array2::<f64>::zeros((2, 5));
        assert!(matches!(
            train(narrow.view(), targets.view(), &config),
            Err(TrainingError::ChannelMismatch { found: 3, .. })
        ));

        let mut bad = config.clone();
        bad.dropout = 1.0;
        assert!(matches!(bad.validate(), Err(TrainingError::InvalidConfig(_))));
    }
}

//! Feed-forward layers, activations and weight initialisers.

use crate::model::optimizer::{Adam, Param};
use ndarray::{Array1, Array2, ArrayView2, Axis, Ix1, Ix2};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::StandardNormal;

/// Glorot/Xavier uniform initialisation for a `(fan_in, fan_out)` kernel.
pub fn glorot_uniform<R: Rng + ?Sized>(rng: &mut R, fan_in: usize, fan_out: usize) -> Array2<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((fan_in, fan_out), |_| dist.sample(rng))
}

/// Orthogonal initialisation for a `(rows, cols)` kernel.
///
/// Gram-Schmidt over Gaussian vectors along the longer side, so either the
/// rows or the columns end up orthonormal.
pub fn orthogonal<R: Rng + ?Sized>(rng: &mut R, rows: usize, cols: usize) -> Array2<f64> {
    let (n, len) = if rows <= cols { (rows, cols) } else { (cols, rows) };
    let mut basis: Vec<Array1<f64>> = Vec::with_capacity(n);

    while basis.len() < n {
        let mut v: Array1<f64> = Array1::from_shape_fn(len, |_| rng.sample::<f64, _>(StandardNormal));
        for b in &basis {
            let proj = v.dot(b);
            v.scaled_add(-proj, b);
        }
        let norm = v.dot(&v).sqrt();
        // Retry the (practically impossible) degenerate draw.
        if norm > 1e-8 {
            basis.push(v / norm);
        }
    }

    if rows <= cols {
        Array2::from_shape_fn((rows, cols), |(r, c)| basis[r][c])
    } else {
        Array2::from_shape_fn((rows, cols), |(r, c)| basis[c][r])
    }
}

/// Fully connected layer `y = x·W + b`.
#[derive(Debug, Clone)]
pub struct Dense {
    pub weights: Param<Ix2>,
    pub bias: Param<Ix1>,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, inputs: usize, outputs: usize) -> Self {
        Self {
            weights: Param::new(glorot_uniform(rng, inputs, outputs)),
            bias: Param::new(Array1::zeros(outputs)),
        }
    }

    pub fn forward(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        x.dot(&self.weights.value) + &self.bias.value
    }

    /// Accumulate parameter gradients and return the gradient w.r.t. `x`.
    pub fn backward(&mut self, x: ArrayView2<'_, f64>, dy: ArrayView2<'_, f64>) -> Array2<f64> {
        self.weights.grad += &x.t().dot(&dy);
        self.bias.grad += &dy.sum_axis(Axis(0));
        dy.dot(&self.weights.value.t())
    }

    pub fn zero_grad(&mut self) {
        self.weights.zero_grad();
        self.bias.zero_grad();
    }

    pub fn apply(&mut self, adam: &Adam) {
        adam.update(&mut self.weights);
        adam.update(&mut self.bias);
    }

    pub fn param_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

pub fn relu(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| v.max(0.0))
}

/// Gradient through a ReLU given its pre-activation input.
pub fn relu_backward(pre: &Array2<f64>, dy: &Array2<f64>) -> Array2<f64> {
    let mut dx = dy.clone();
    dx.zip_mut_with(pre, |d, &p| {
        if p <= 0.0 {
            *d = 0.0;
        }
    });
    dx
}

/// Inverted-dropout mask: kept units are scaled by `1 / (1 - rate)`.
///
/// `rate` must lie in `[0, 1)`.
pub fn dropout_mask<R: Rng + ?Sized>(rng: &mut R, shape: (usize, usize), rate: f64) -> Array2<f64> {
    if rate <= 0.0 {
        return Array2::ones(shape);
    }
    let keep = 1.0 - rate;
    let scale = 1.0 / keep;
    Array2::from_shape_fn(shape, |_| if rng.gen::<f64>() < keep { scale } else { 0.0 })
}

/// Row-wise softmax.
pub fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Probabilities are clipped to this range before taking logs.
const PROB_EPSILON: f64 = 1e-7;

/// Mean categorical cross-entropy over a batch.
pub fn cross_entropy(probs: &Array2<f64>, targets: ArrayView2<'_, f64>) -> f64 {
    let batch = probs.nrows().max(1) as f64;
    let mut total = 0.0;
    ndarray::Zip::from(probs).and(&targets).for_each(|&p, &y| {
        if y != 0.0 {
            total -= y * p.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON).ln();
        }
    });
    total / batch
}

/// Gradient of mean cross-entropy w.r.t. the softmax logits.
pub fn softmax_cross_entropy_backward(probs: &Array2<f64>, targets: ArrayView2<'_, f64>) -> Array2<f64> {
    let batch = probs.nrows().max(1) as f64;
    (probs - &targets) / batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let probs = softmax(&array![[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
        for row in probs.rows() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        assert!(probs[[0, 2]] > probs[[0, 1]]);
        assert_relative_eq!(probs[[1, 0]], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cross_entropy_of_confident_prediction() {
        let probs = array![[0.9, 0.1], [0.2, 0.8]];
        let targets = array![[1.0, 0.0], [0.0, 1.0]];
        let expected = -(0.9f64.ln() + 0.8f64.ln()) / 2.0;
        assert_relative_eq!(cross_entropy(&probs, targets.view()), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_relu_backward_masks_negative_inputs() {
        let pre = array![[-1.0, 2.0], [0.0, 3.0]];
        let dy = array![[5.0, 5.0], [5.0, 5.0]];
        assert_eq!(relu(&pre), array![[0.0, 2.0], [0.0, 3.0]]);
        assert_eq!(relu_backward(&pre, &dy), array![[0.0, 5.0], [0.0, 5.0]]);
    }

    #[test]
    fn test_dropout_mask_scaling() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mask = dropout_mask(&mut rng, (50, 40), 0.5);
        assert!(mask.iter().all(|&m| m == 0.0 || m == 2.0));

        let kept = mask.iter().filter(|&&m| m > 0.0).count() as f64 / mask.len() as f64;
        assert!((kept - 0.5).abs() < 0.1);

        let none = dropout_mask(&mut rng, (2, 2), 0.0);
        assert_eq!(none, Array2::<f64>::ones((2, 2)));
    }

    #[test]
    fn test_orthogonal_rows_are_orthonormal() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let w = orthogonal(&mut rng, 4, 16);
        let gram = w.dot(&w.t());
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(gram[[i, j]], expected, epsilon = 1e-9);
            }
        }

        let tall = orthogonal(&mut rng, 16, 4);
        let gram = tall.t().dot(&tall);
        assert_relative_eq!(gram[[2, 2]], 1.0, epsilon = 1e-9);
        assert_relative_eq!(gram[[0, 3]], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_dense_gradient_matches_finite_difference() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut layer = Dense::new(&mut rng, 3, 2);
        let x = array![[0.5, -1.0, 2.0], [1.5, 0.25, -0.75]];

        // Loss = sum(y), so dy is all ones.
        let dy = Array2::ones((2, 2));
        layer.zero_grad();
        layer.backward(x.view(), dy.view());

        let h = 1e-6;
        let original = layer.weights.value[[1, 0]];
        layer.weights.value[[1, 0]] = original + h;
        let plus = layer.forward(x.view()).sum();
        layer.weights.value[[1, 0]] = original - h;
        let minus = layer.forward(x.view()).sum();
        layer.weights.value[[1, 0]] = original;

        assert_relative_eq!(layer.weights.grad[[1, 0]], (plus - minus) / (2.0 * h), epsilon = 1e-6);
        assert_relative_eq!(layer.bias.grad[1], 2.0, epsilon = 1e-12);
    }
}

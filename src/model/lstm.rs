//! Long short-term memory layer with back-propagation through time.
//!
//! Gate layout inside the fused kernels is `[input, forget, cell, output]`,
//! each `hidden` columns wide. Only the final hidden state is exposed, which
//! is all the classifier head consumes.

use crate::model::layers::{glorot_uniform, orthogonal};
use crate::model::optimizer::{Adam, Param};
use ndarray::{s, Array1, Array2, ArrayView3, Axis, Ix1, Ix2};
use rand::Rng;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// One direction of a recurrent layer.
#[derive(Debug, Clone)]
pub struct Lstm {
    /// Input kernel, `(input, 4 * hidden)`
    pub kernel: Param<Ix2>,
    /// Recurrent kernel, `(hidden, 4 * hidden)`
    pub recurrent: Param<Ix2>,
    /// `(4 * hidden)`
    pub bias: Param<Ix1>,
    hidden: usize,
    /// Process the sequence last-to-first
    reverse: bool,
}

/// Activations of one timestep, kept for the backward pass.
#[derive(Debug, Clone)]
struct Step {
    t: usize,
    h_prev: Array2<f64>,
    c_prev: Array2<f64>,
    i: Array2<f64>,
    f: Array2<f64>,
    g: Array2<f64>,
    o: Array2<f64>,
    tanh_c: Array2<f64>,
}

/// Forward-pass record of a whole sequence.
#[derive(Debug, Clone)]
pub struct LstmCache {
    steps: Vec<Step>,
}

impl Lstm {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, input: usize, hidden: usize, reverse: bool) -> Self {
        let mut bias = Array1::zeros(4 * hidden);
        // Forget gate starts open.
        bias.slice_mut(s![hidden..2 * hidden]).fill(1.0);

        Self {
            kernel: Param::new(glorot_uniform(rng, input, 4 * hidden)),
            recurrent: Param::new(orthogonal(rng, hidden, 4 * hidden)),
            bias: Param::new(bias),
            hidden,
            reverse,
        }
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    fn order(&self, steps: usize) -> Vec<usize> {
        if self.reverse {
            (0..steps).rev().collect()
        } else {
            (0..steps).collect()
        }
    }

    /// Final hidden state for a `(batch, steps, input)` sequence batch.
    pub fn forward(&self, x: ArrayView3<'_, f64>) -> Array2<f64> {
        self.run(x, false).0
    }

    /// Final hidden state plus the cache needed by [`Lstm::backward`].
    pub fn forward_train(&self, x: ArrayView3<'_, f64>) -> (Array2<f64>, LstmCache) {
        let (h, cache) = self.run(x, true);
        (h, cache.unwrap_or(LstmCache { steps: Vec::new() }))
    }

    fn run(&self, x: ArrayView3<'_, f64>, keep: bool) -> (Array2<f64>, Option<LstmCache>) {
        let (batch, steps, _) = x.dim();
        let n = self.hidden;
        let mut h = Array2::<f64>::zeros((batch, n));
        let mut c = Array2::<f64>::zeros((batch, n));
        let mut cache = Vec::with_capacity(if keep { steps } else { 0 });

        for t in self.order(steps) {
            let x_t = x.index_axis(Axis(1), t);
            let z = x_t.dot(&self.kernel.value) + h.dot(&self.recurrent.value) + &self.bias.value;

            let i = z.slice(s![.., 0..n]).mapv(sigmoid);
            let f = z.slice(s![.., n..2 * n]).mapv(sigmoid);
            let g = z.slice(s![.., 2 * n..3 * n]).mapv(f64::tanh);
            let o = z.slice(s![.., 3 * n..4 * n]).mapv(sigmoid);

            let c_next = &f * &c + &i * &g;
            let tanh_c = c_next.mapv(f64::tanh);
            let h_next = &o * &tanh_c;

            if keep {
                cache.push(Step {
                    t,
                    h_prev: h,
                    c_prev: c,
                    i,
                    f,
                    g,
                    o,
                    tanh_c,
                });
            }

            h = h_next;
            c = c_next;
        }

        (h, keep.then_some(LstmCache { steps: cache }))
    }

    /// Accumulate parameter gradients given the gradient of the final
    /// hidden state.
    pub fn backward(&mut self, x: ArrayView3<'_, f64>, cache: &LstmCache, dh_last: &Array2<f64>) {
        let n = self.hidden;
        let mut dh = dh_last.clone();
        let mut dc = Array2::<f64>::zeros(dh.raw_dim());

        for step in cache.steps.iter().rev() {
            let d_o = &dh * &step.tanh_c;
            dc = dc + &dh * &step.o * &step.tanh_c.mapv(|v| 1.0 - v * v);

            let d_i = &dc * &step.g;
            let d_g = &dc * &step.i;
            let d_f = &dc * &step.c_prev;

            let mut dz = Array2::<f64>::zeros((dh.nrows(), 4 * n));
            dz.slice_mut(s![.., 0..n])
                .assign(&(&d_i * &step.i.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![.., n..2 * n])
                .assign(&(&d_f * &step.f.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![.., 2 * n..3 * n])
                .assign(&(&d_g * &step.g.mapv(|v| 1.0 - v * v)));
            dz.slice_mut(s![.., 3 * n..4 * n])
                .assign(&(&d_o * &step.o.mapv(|v| v * (1.0 - v))));

            let x_t = x.index_axis(Axis(1), step.t);
            self.kernel.grad += &x_t.t().dot(&dz);
            self.recurrent.grad += &step.h_prev.t().dot(&dz);
            self.bias.grad += &dz.sum_axis(Axis(0));

            dh = dz.dot(&self.recurrent.value.t());
            dc = &dc * &step.f;
        }
    }

    pub fn zero_grad(&mut self) {
        self.kernel.zero_grad();
        self.recurrent.zero_grad();
        self.bias.zero_grad();
    }

    pub fn apply(&mut self, adam: &Adam) {
        adam.update(&mut self.kernel);
        adam.update(&mut self.recurrent);
        adam.update(&mut self.bias);
    }

    pub fn param_count(&self) -> usize {
        self.kernel.len() + self.recurrent.len() + self.bias.len()
    }
}

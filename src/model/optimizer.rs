//! Trainable parameters and the Adam optimizer.

use ndarray::{Array, Dimension, Zip};

/// A weight tensor with its gradient and Adam moment estimates.
#[derive(Debug, Clone)]
pub struct Param<D: Dimension> {
    pub value: Array<f64, D>,
    pub grad: Array<f64, D>,
    m: Array<f64, D>,
    v: Array<f64, D>,
}

impl<D: Dimension> Param<D> {
    pub fn new(value: Array<f64, D>) -> Self {
        let dim = value.raw_dim();
        Self {
            grad: Array::zeros(dim.clone()),
            m: Array::zeros(dim.clone()),
            v: Array::zeros(dim),
            value,
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Adam with bias correction.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
}

impl Adam {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
        }
    }

    /// Advance the timestep. Call once per batch, before [`Adam::update`].
    pub fn tick(&mut self) {
        self.t += 1;
    }

    /// Apply the current gradient of `param`.
    pub fn update<D: Dimension>(&self, param: &mut Param<D>) {
        let t = self.t.max(1);
        let bias_correction1 = 1.0 - self.beta1.powi(t);
        let bias_correction2 = 1.0 - self.beta2.powi(t);
        let (beta1, beta2, lr, epsilon) = (self.beta1, self.beta2, self.lr, self.epsilon);

        Zip::from(&mut param.value)
            .and(&mut param.m)
            .and(&mut param.v)
            .and(&param.grad)
            .for_each(|w, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;

                let m_hat = *m / bias_correction1;
                let v_hat = *v / bias_correction2;
                *w -= lr * m_hat / (v_hat.sqrt() + epsilon);
            });
    }

    pub fn timestep(&self) -> i32 {
        self.t
    }
}

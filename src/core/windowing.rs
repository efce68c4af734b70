//! Fixed-size windows over sample sequences.
//!
//! Training recordings are cut into overlapping windows (stride
//! [`WINDOW_STEP`]) to get many sequences out of a short recording. The live
//! stream is cut into consecutive, non-overlapping windows by
//! [`WindowAssembler`].

use crate::collector::types::{Sample, CHANNELS};
use ndarray::{Array2, ArrayView2};

/// Number of samples in each window.
pub const WINDOW_SIZE: usize = 40;

/// Offset between the starts of consecutive training windows.
pub const WINDOW_STEP: usize = 15;

/// Exactly [`WINDOW_SIZE`] consecutive samples, shaped `(WINDOW_SIZE, CHANNELS)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    data: Array2<f64>,
}

impl Window {
    /// Build a window from exactly [`WINDOW_SIZE`] samples.
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        if samples.len() != WINDOW_SIZE {
            return None;
        }
        let data = Array2::from_shape_fn((WINDOW_SIZE, CHANNELS), |(t, c)| samples[t].values[c]);
        Some(Self { data })
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// The sample at position `t` within the window.
    pub fn sample(&self, t: usize) -> Option<Sample> {
        if t >= WINDOW_SIZE {
            return None;
        }
        let row = self.data.row(t);
        let mut values = [0.0; CHANNELS];
        for (slot, value) in values.iter_mut().zip(row.iter()) {
            *slot = *value;
        }
        Some(Sample::new(values))
    }
}

/// Start offsets of the overlapping windows over `len` samples.
///
/// Windows start at 0, [`WINDOW_STEP`], 2·[`WINDOW_STEP`], … and a window
/// is only taken while its start is strictly below `len - WINDOW_SIZE`, so
/// a recording of [`WINDOW_SIZE`] samples or fewer yields nothing.
pub fn window_starts(len: usize) -> impl Iterator<Item = usize> {
    (0..len.saturating_sub(WINDOW_SIZE)).step_by(WINDOW_STEP)
}

/// Number of overlapping windows [`sliding_windows`] produces for `len` samples.
pub fn window_count(len: usize) -> usize {
    if len <= WINDOW_SIZE {
        0
    } else {
        (len - WINDOW_SIZE - 1) / WINDOW_STEP + 1
    }
}

/// Cut a recording into overlapping windows.
pub fn sliding_windows(samples: &[Sample]) -> Vec<Window> {
    window_starts(samples.len())
        .filter_map(|start| Window::from_samples(&samples[start..start + WINDOW_SIZE]))
        .collect()
}

/// Assembles a live sample stream into consecutive, non-overlapping windows.
#[derive(Debug, Clone)]
pub struct WindowAssembler {
    buffer: Vec<Sample>,
    completed: u64,
}

impl WindowAssembler {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(WINDOW_SIZE),
            completed: 0,
        }
    }

    /// Add a sample; returns a window every [`WINDOW_SIZE`] samples.
    pub fn push(&mut self, sample: Sample) -> Option<Window> {
        self.buffer.push(sample);
        if self.buffer.len() < WINDOW_SIZE {
            return None;
        }

        let window = Window::from_samples(&self.buffer);
        self.buffer.clear();
        self.completed += 1;
        window
    }

    /// Samples collected towards the next window.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Windows completed so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }
}

impl Default for WindowAssembler {
    fn default() -> Self {
        Self::new()
    }
}

//! Training set assembly from per-label CSV recordings.
//!
//! Every label has a dedicated headerless recording at
//! `<dir>/train-<label>.csv`. Recordings are windowed in label declaration
//! order, so the resulting set holds one contiguous block per label.

use crate::collector::types::{ActivityLabel, DecodeError, Sample, CHANNELS};
use crate::core::windowing::{sliding_windows, Window, WINDOW_SIZE};
use ndarray::{s, Array3, ArrayView2, ArrayView3};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// A required recording could not be used.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("recording not found: {path:?}")]
    Missing { path: PathBuf },

    #[error("could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("recording is empty: {path:?}")]
    Empty { path: PathBuf },

    #[error("{path:?} line {line}: {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: DecodeError,
    },

    #[error("{path:?} has {found} samples, at least {needed} are needed")]
    TooShort {
        path: PathBuf,
        found: usize,
        needed: usize,
    },

    #[error("no training windows could be built; every recording is too short to window")]
    NoWindows,
}

/// Path of the training recording for a label.
pub fn training_file(dir: &Path, label: ActivityLabel) -> PathBuf {
    dir.join(format!("train-{}.csv", label.as_str()))
}

/// Path of the sanity-check recording for a label.
pub fn test_file(dir: &Path, label: ActivityLabel) -> PathBuf {
    dir.join(format!("test-{}.csv", label.as_str()))
}

/// Read every sample in a headerless six-column CSV recording.
///
/// Blank lines are ignored. Any other record that does not convert fails the
/// whole recording.
pub fn load_samples(path: &Path) -> Result<Vec<Sample>, DataError> {
    if !path.exists() {
        return Err(DataError::Missing {
            path: path.to_path_buf(),
        });
    }

    let io_error = |source: csv::Error| DataError::Io {
        path: path.to_path_buf(),
        source: source.into(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(io_error)?;

    let mut samples = Vec::new();
    for result in reader.records() {
        let record = result.map_err(io_error)?;
        let sample = Sample::from_record(&record).map_err(|source| DataError::Malformed {
            path: path.to_path_buf(),
            line: record.position().map_or(0, |p| p.line() as usize),
            source,
        })?;
        samples.push(sample);
    }

    if samples.is_empty() {
        return Err(DataError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(samples)
}

/// Read the first [`WINDOW_SIZE`] samples of a recording as one window.
pub fn load_window(path: &Path) -> Result<Window, DataError> {
    let samples = load_samples(path)?;
    if samples.len() < WINDOW_SIZE {
        return Err(DataError::TooShort {
            path: path.to_path_buf(),
            found: samples.len(),
            needed: WINDOW_SIZE,
        });
    }
    Window::from_samples(&samples[..WINDOW_SIZE]).ok_or(DataError::TooShort {
        path: path.to_path_buf(),
        found: samples.len(),
        needed: WINDOW_SIZE,
    })
}

/// Windows and their labels, in build order.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    /// `(len, WINDOW_SIZE, CHANNELS)`
    inputs: Array3<f64>,
    labels: Vec<ActivityLabel>,
}

impl TrainingSet {
    /// Stack labelled windows into a training set.
    pub fn from_windows(windows: Vec<(Window, ActivityLabel)>) -> Self {
        let mut inputs = Array3::zeros((windows.len(), WINDOW_SIZE, CHANNELS));
        let mut labels = Vec::with_capacity(windows.len());

        for (i, (window, label)) in windows.into_iter().enumerate() {
            inputs.slice_mut(s![i, .., ..]).assign(&window.view());
            labels.push(label);
        }

        Self { inputs, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn inputs(&self) -> ArrayView3<'_, f64> {
        self.inputs.view()
    }

    pub fn labels(&self) -> &[ActivityLabel] {
        &self.labels
    }

    /// The window and label at an ordinal index.
    pub fn get(&self, index: usize) -> Option<(ArrayView2<'_, f64>, ActivityLabel)> {
        let label = *self.labels.get(index)?;
        Some((self.inputs.slice(s![index, .., ..]), label))
    }

    /// Number of windows per label, in label order.
    pub fn label_counts(&self) -> [(ActivityLabel, usize); ActivityLabel::COUNT] {
        let mut counts = ActivityLabel::ALL.map(|label| (label, 0));
        for label in &self.labels {
            counts[label.index()].1 += 1;
        }
        counts
    }
}

/// Builds the training set from a directory of recordings.
#[derive(Debug, Clone)]
pub struct DatasetBuilder {
    dir: PathBuf,
}

impl DatasetBuilder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Window every label's recording and stack the results.
    ///
    /// A recording too short to yield a window contributes nothing and is
    /// logged; only a set with no windows at all is an error.
    pub fn build(&self) -> Result<TrainingSet, DataError> {
        let mut windows = Vec::new();

        for label in ActivityLabel::ALL {
            let path = training_file(&self.dir, label);
            info!(label = %label, path = %path.display(), "getting training examples");

            let samples = load_samples(&path)?;
            let label_windows = sliding_windows(&samples);
            if label_windows.is_empty() {
                warn!(
                    label = %label,
                    samples = samples.len(),
                    "recording too short for a single window; label contributes no examples"
                );
            }

            windows.extend(label_windows.into_iter().map(|window| (window, label)));
        }

        if windows.is_empty() {
            return Err(DataError::NoWindows);
        }

        let set = TrainingSet::from_windows(windows);
        info!(windows = set.len(), shape = ?set.inputs().dim(), "training data shaped");
        Ok(set)
    }
}

//! Destinations for samples collated from a phone.
//!
//! A [`CsvRecorder`] appends samples to a label's training recording for a
//! fixed duration; the Kafka publisher relays them to the raw events topic.

use crate::bus::TransportError;
use crate::collector::types::{ActivityLabel, Sample};
use crate::core::dataset::training_file;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

/// Whether a sink wants more samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Accepted,
    /// The sink is done; the sample was not stored
    Finished,
}

/// Capture could not continue.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("could not write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write a record to {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Receives collated samples.
pub trait SampleSink: Send {
    fn accept(&mut self, sample: Sample) -> Result<SinkStatus, CaptureError>;

    /// Flush anything buffered. Called once capture ends.
    fn finish(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Samples stored so far.
    fn stored(&self) -> u64;
}

/// Appends samples to `train-<label>.csv` until its duration runs out.
///
/// The clock starts with the first sample, so warm-up time does not count.
pub struct CsvRecorder {
    writer: csv::Writer<File>,
    path: PathBuf,
    label: ActivityLabel,
    duration: Duration,
    started: Option<Instant>,
    recorded: u64,
}

impl CsvRecorder {
    /// Open (or create) the training recording for `label` under `dir`.
    pub fn create(dir: &Path, label: ActivityLabel, duration: Duration) -> Result<Self, CaptureError> {
        std::fs::create_dir_all(dir).map_err(|source| CaptureError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = training_file(dir, label);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| CaptureError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(file),
            path,
            label,
            duration,
            started: None,
            recorded: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store `sample` as observed at `now`.
    pub fn accept_at(&mut self, sample: Sample, now: Instant) -> Result<SinkStatus, CaptureError> {
        let started = *self.started.get_or_insert_with(|| {
            info!(
                label = %self.label,
                seconds = self.duration.as_secs(),
                "starting to record training samples"
            );
            now
        });

        if now.saturating_duration_since(started) >= self.duration {
            return Ok(SinkStatus::Finished);
        }

        self.writer
            .serialize(sample.values)
            .map_err(|source| CaptureError::Csv {
                path: self.path.clone(),
                source,
            })?;
        self.recorded += 1;
        Ok(SinkStatus::Accepted)
    }
}

impl SampleSink for CsvRecorder {
    fn accept(&mut self, sample: Sample) -> Result<SinkStatus, CaptureError> {
        self.accept_at(sample, Instant::now())
    }

    fn finish(&mut self) -> Result<(), CaptureError> {
        self.writer.flush().map_err(|source| CaptureError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!(
            label = %self.label,
            samples = self.recorded,
            path = %self.path.display(),
            "training data capture complete"
        );
        Ok(())
    }

    fn stored(&self) -> u64 {
        self.recorded
    }
}

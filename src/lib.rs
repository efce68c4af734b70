//! Activity Sense - phone activity recognition from sensor event streams.
//!
//! This library trains a recurrent classifier on labelled accelerometer and
//! gyroscope recordings, then classifies a live stream of readings and
//! reports only when the recognised activity changes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Activity Sense                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │ CSV records │──▶│  Windowing  │──▶│   Dataset   │       │
//! │  │ (per label) │   │ (40 / 15)   │   │  + Codec    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                             │              │
//! │                                             ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │ Kafka (raw) │──▶│  Inference  │◀──│   BiLSTM    │       │
//! │  │  consumer   │   │    loop     │   │ classifier  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                           │                                │
//! │                           ▼                                │
//! │                    ┌─────────────┐                         │
//! │                    │Kafka (label │                         │
//! │                    │  changes)   │                         │
//! │                    └─────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use activity_sense::core::{DatasetBuilder, run_sanity_check};
//! use activity_sense::model::{train_on_set, ClassifierConfig};
//! use std::path::Path;
//!
//! let set = DatasetBuilder::new("trainingdata").build()?;
//! let (classifier, codec, _report) = train_on_set(&set, &ClassifierConfig::default())?;
//! run_sanity_check(&classifier, &codec, Path::new("testdata"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bus;
pub mod capture;
pub mod collector;
pub mod config;
pub mod core;
pub mod model;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use bus::{LabelSink, TransportError};
pub use capture::{CaptureError, CsvRecorder, SampleSink};
pub use collector::{ActivityLabel, DecodeError, RawRecord, Sample};
pub use config::{BusConfig, Config, ConfigError};
pub use core::{DataError, DatasetBuilder, LabelCodec, TrainingSet, Window};
pub use model::{ClassifierConfig, TrainedClassifier, TrainingError, WindowClassifier};
pub use stats::{SharedStreamStats, StreamStats};

#[cfg(feature = "kafka")]
pub use bus::{KafkaCollector, KafkaPublisher};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

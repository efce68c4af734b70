//! Sensor sample types and phone-side collation.
//!
//! This module provides the shared [`Sample`] record, the fixed
//! [`ActivityLabel`] set, and the [`SensorCollator`] that merges separate
//! accelerometer and gyroscope updates into samples.

pub mod collate;
pub mod types;

// Re-export commonly used types
pub use collate::{SensorCollator, SensorKind};
pub use types::{
    ActivityLabel, DecodeError, RawRecord, Sample, UnknownLabel, CHANNELS, CHANNEL_NAMES,
};

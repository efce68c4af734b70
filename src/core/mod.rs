//! Core pipeline.
//!
//! This module contains:
//! - Windowing of recordings and of the live stream
//! - Training set assembly from CSV recordings
//! - The label codec
//! - Post-training sanity check
//! - The streaming inference loop

pub mod codec;
pub mod dataset;
pub mod inference;
pub mod sanity;
pub mod windowing;

// Re-export commonly used types
pub use codec::LabelCodec;
pub use dataset::{DataError, DatasetBuilder, TrainingSet};
pub use inference::{run_stream, InferenceState, StreamClassifier, StreamPhase};
pub use sanity::{run_sanity_check, SanityResult};
pub use windowing::{sliding_windows, Window, WindowAssembler, WINDOW_SIZE, WINDOW_STEP};

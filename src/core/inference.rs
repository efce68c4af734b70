//! Streaming classification with change-only emission.
//!
//! Records are decoded into samples and grouped into consecutive,
//! non-overlapping windows. Each completed window is classified and the
//! label is published only when it differs from the last one published.

use crate::bus::{LabelSink, TransportError};
use crate::collector::types::{ActivityLabel, RawRecord};
use crate::core::codec::LabelCodec;
use crate::core::windowing::{Window, WindowAssembler};
use crate::model::WindowClassifier;
use crate::stats::StreamStats;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the loop wakes up to check the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The last label published downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceState {
    last: Option<ActivityLabel>,
}

impl InferenceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<ActivityLabel> {
        self.last
    }

    /// Record a verdict. Returns true when it should be emitted.
    pub fn observe(&mut self, label: ActivityLabel) -> bool {
        if self.last == Some(label) {
            return false;
        }
        self.last = Some(label);
        true
    }
}

/// Where the stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// The first window is still filling
    Priming,
    /// At least one window has been classified
    Steady,
}

/// Turns inbound records into label changes.
pub struct StreamClassifier<'a, C: WindowClassifier> {
    classifier: &'a C,
    codec: &'a LabelCodec,
    assembler: WindowAssembler,
    state: InferenceState,
    stats: &'a StreamStats,
}

impl<'a, C: WindowClassifier> StreamClassifier<'a, C> {
    pub fn new(classifier: &'a C, codec: &'a LabelCodec, stats: &'a StreamStats) -> Self {
        Self {
            classifier,
            codec,
            assembler: WindowAssembler::new(),
            state: InferenceState::new(),
            stats,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        if self.assembler.completed() == 0 {
            StreamPhase::Priming
        } else {
            StreamPhase::Steady
        }
    }

    pub fn state(&self) -> &InferenceState {
        &self.state
    }

    /// Samples waiting for the current window to complete.
    pub fn pending(&self) -> usize {
        self.assembler.pending()
    }

    /// Process one record. Returns the label to emit, if any.
    ///
    /// Undecodable records are logged, counted and otherwise ignored; they
    /// do not occupy a slot in the current window.
    pub fn push_record(&mut self, record: &RawRecord) -> Option<ActivityLabel> {
        self.stats.record_received();

        let sample = match record.decode() {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.record_skipped();
                let key = record.key_lossy().unwrap_or_else(|| "-".to_string());
                warn!(key = %key, "skipping undecodable record: {e}");
                return None;
            }
        };

        let window = self.assembler.push(sample)?;
        self.classify(&window)
    }

    fn classify(&mut self, window: &Window) -> Option<ActivityLabel> {
        let probabilities = self.classifier.predict_window(window);
        let label = self.codec.decode(probabilities.view());
        self.stats.record_window_classified();

        if self.state.observe(label) {
            info!(label = %label, "activity changed");
            Some(label)
        } else {
            debug!(label = %label, "activity unchanged");
            None
        }
    }
}

/// Classify records from `source` until `running` is cleared.
///
/// Every label change is published to `sink` in arrival order. A publish
/// failure or a closed source ends the stream with an error; quiet periods
/// on the source never do.
pub fn run_stream<C: WindowClassifier>(
    classifier: &C,
    codec: &LabelCodec,
    source: &Receiver<RawRecord>,
    sink: &mut dyn LabelSink,
    running: &AtomicBool,
    stats: &StreamStats,
) -> Result<(), TransportError> {
    let mut stream = StreamClassifier::new(classifier, codec, stats);
    info!("waiting for the first window");

    while running.load(Ordering::SeqCst) {
        match source.recv_timeout(POLL_INTERVAL) {
            Ok(record) => {
                let was_priming = stream.phase() == StreamPhase::Priming;
                let emitted = stream.push_record(&record);

                if was_priming && stream.phase() == StreamPhase::Steady {
                    debug!("first window complete");
                }
                if let Some(label) = emitted {
                    sink.publish(label)?;
                    stats.record_label_emitted();
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                error!("record source disconnected");
                return Err(TransportError::SourceClosed);
            }
        }
    }

    info!("stream stopped");
    Ok(())
}

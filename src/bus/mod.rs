//! Message-bus plumbing.
//!
//! The inference loop only sees a [`crossbeam_channel::Receiver`] of
//! [`RawRecord`](crate::collector::RawRecord)s and a [`LabelSink`]; the Kafka
//! consumer and producer behind them live in [`consumer`] and [`producer`].

#[cfg(feature = "kafka")]
pub mod consumer;
#[cfg(feature = "kafka")]
pub mod producer;

use crate::collector::types::ActivityLabel;
use thiserror::Error;

#[cfg(feature = "kafka")]
pub use consumer::KafkaCollector;
#[cfg(feature = "kafka")]
pub use producer::KafkaPublisher;

/// Bounded capacity of the channel between the consumer thread and the
/// inference loop.
pub const CHANNEL_CAPACITY: usize = 10_000;

/// The stream transport failed. Always fatal for the session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {hosts}: {reason}")]
    Connect { hosts: String, reason: String },

    #[error("failed to poll topic {topic}: {reason}")]
    Poll { topic: String, reason: String },

    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("consumer is already running")]
    AlreadyRunning,

    #[error("inbound record source closed")]
    SourceClosed,
}

/// Destination for label-change notifications.
pub trait LabelSink {
    fn publish(&mut self, label: ActivityLabel) -> Result<(), TransportError>;
}

/// Collects labels in memory.
impl LabelSink for Vec<ActivityLabel> {
    fn publish(&mut self, label: ActivityLabel) -> Result<(), TransportError> {
        self.push(label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_keeps_order() {
        let mut sink: Vec<ActivityLabel> = Vec::new();
        sink.publish(ActivityLabel::Idle).unwrap();
        sink.publish(ActivityLabel::Running).unwrap();
        assert_eq!(sink, vec![ActivityLabel::Idle, ActivityLabel::Running]);
    }

    #[test]
    fn test_error_messages() {
        let err = TransportError::Publish {
            topic: "processed".to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(err.to_string(), "failed to publish to processed: broker down");
        assert_eq!(
            TransportError::SourceClosed.to_string(),
            "inbound record source closed"
        );
    }
}

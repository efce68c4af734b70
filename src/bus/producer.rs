//! Kafka producer for label changes and relayed samples.

use crate::bus::{LabelSink, TransportError};
use crate::capture::{CaptureError, SampleSink, SinkStatus};
use crate::collector::types::{ActivityLabel, Sample};
use crate::config::BusConfig;
use chrono::Utc;
use kafka::producer::{Producer, Record, RequiredAcks};
use std::time::Duration;
use tracing::debug;

/// Publishes to a single topic.
pub struct KafkaPublisher {
    producer: Producer,
    topic: String,
    sent: u64,
}

impl KafkaPublisher {
    /// Connect a producer for `topic`.
    pub fn connect(config: &BusConfig, topic: &str) -> Result<Self, TransportError> {
        let producer = Producer::from_hosts(config.bootstrap.clone())
            .with_client_id(config.client_id.clone())
            .with_ack_timeout(Duration::from_secs(1))
            .with_required_acks(RequiredAcks::One)
            .create()
            .map_err(|e| TransportError::Connect {
                hosts: config.bootstrap.join(","),
                reason: e.to_string(),
            })?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
            sent: 0,
        })
    }

    /// Publisher for the processed (label change) topic.
    pub fn processed(config: &BusConfig) -> Result<Self, TransportError> {
        Self::connect(config, &config.processed_topic)
    }

    /// Publisher for the raw events topic.
    pub fn raw(config: &BusConfig) -> Result<Self, TransportError> {
        Self::connect(config, &config.raw_topic)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Messages sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Send an unkeyed message.
    pub fn send_value(&mut self, value: &[u8]) -> Result<(), TransportError> {
        self.producer
            .send(&Record::from_value(&self.topic, value))
            .map_err(|e| self.publish_error(e))?;
        self.sent += 1;
        Ok(())
    }

    /// Send a keyed message.
    pub fn send_keyed(&mut self, key: &[u8], value: &[u8]) -> Result<(), TransportError> {
        self.producer
            .send(&Record::from_key_value(&self.topic, key, value))
            .map_err(|e| self.publish_error(e))?;
        self.sent += 1;
        Ok(())
    }

    fn publish_error(&self, e: kafka::Error) -> TransportError {
        TransportError::Publish {
            topic: self.topic.clone(),
            reason: e.to_string(),
        }
    }
}

impl LabelSink for KafkaPublisher {
    fn publish(&mut self, label: ActivityLabel) -> Result<(), TransportError> {
        debug!(topic = %self.topic, label = %label, "publishing label change");
        self.send_value(label.as_str().as_bytes())
    }
}

/// Relays phone samples to the raw events topic, keyed by capture time.
impl SampleSink for KafkaPublisher {
    fn accept(&mut self, sample: Sample) -> Result<SinkStatus, CaptureError> {
        let key = Utc::now().to_rfc3339();
        self.send_keyed(key.as_bytes(), sample.to_csv_line().as_bytes())?;
        Ok(SinkStatus::Accepted)
    }

    fn stored(&self) -> u64 {
        self.sent
    }
}

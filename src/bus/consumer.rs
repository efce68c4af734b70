//! Kafka consumer that feeds inbound records into a bounded channel.
//!
//! The consumer runs on its own thread. Every session starts at the latest
//! offset of each partition and no offsets are stored, so records produced
//! while the process was down are never classified. Messages are forwarded
//! in arrival order. The channel is owned by the thread, so the receiver
//! observes a disconnect once the thread exits.

use crate::bus::{TransportError, CHANNEL_CAPACITY};
use crate::collector::types::RawRecord;
use crate::config::BusConfig;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use kafka::consumer::{Consumer, FetchOffset, GroupOffsetStorage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// How long a full channel may block the consumer before it re-checks the
/// stop flag.
const SEND_RETRY: Duration = Duration::from_millis(100);

/// Where every session starts reading.
const START_OFFSET: FetchOffset = FetchOffset::Latest;

/// Consumed offsets are never stored; a restart must not resume a backlog.
const OFFSET_STORAGE: Option<GroupOffsetStorage> = None;

/// Background Kafka consumer for the raw events topic.
pub struct KafkaCollector {
    config: BusConfig,
    running: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<TransportError>>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl KafkaCollector {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
            thread_handle: None,
        }
    }

    /// Connect to the brokers and start consuming in a background thread.
    ///
    /// Returns once the consumer is connected, so connection problems
    /// surface here rather than as a closed channel later.
    pub fn start(&mut self) -> Result<Receiver<RawRecord>, TransportError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyRunning);
        }

        let (sender, receiver) = bounded(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<(), TransportError>>(1);

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let failure = self.failure.clone();
        let config = self.config.clone();

        let handle = thread::spawn(move || {
            let mut consumer = match connect(&config) {
                Ok(consumer) => {
                    let _ = ready_tx.send(Ok(()));
                    consumer
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            if let Err(e) = consume_loop(&mut consumer, &config.raw_topic, &sender, &running) {
                error!("Kafka consumer stopped: {e}");
                if let Ok(mut slot) = failure.lock() {
                    *slot = Some(e);
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(topic = %self.config.raw_topic, "consuming from latest offset");
                Ok(receiver)
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(TransportError::Connect {
                    hosts: self.config.bootstrap.join(","),
                    reason: "consumer thread exited during startup".to_string(),
                })
            }
        }
    }

    /// Stop consuming and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// The error that ended the consumer thread, if any.
    pub fn take_error(&self) -> Option<TransportError> {
        self.failure.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Drop for KafkaCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn connect(config: &BusConfig) -> Result<Consumer, TransportError> {
    Consumer::from_hosts(config.bootstrap.clone())
        .with_topic(config.raw_topic.clone())
        .with_client_id(config.client_id.clone())
        .with_fallback_offset(START_OFFSET)
        .with_offset_storage(OFFSET_STORAGE)
        .create()
        .map_err(|e| TransportError::Connect {
            hosts: config.bootstrap.join(","),
            reason: e.to_string(),
        })
}

fn consume_loop(
    consumer: &mut Consumer,
    topic: &str,
    sender: &Sender<RawRecord>,
    running: &AtomicBool,
) -> Result<(), TransportError> {
    while running.load(Ordering::SeqCst) {
        let sets = consumer.poll().map_err(|e| TransportError::Poll {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        if sets.is_empty() {
            continue;
        }

        for set in sets.iter() {
            for message in set.messages() {
                let key = (!message.key.is_empty()).then(|| message.key.to_vec());
                let record = RawRecord::new(key, message.value.to_vec());
                if !forward(sender, record, running) {
                    debug!("record channel closed, consumer exiting");
                    return Ok(());
                }
            }
            // Advances the in-memory fetch position only.
            consumer
                .consume_messageset(set)
                .map_err(|e| TransportError::Poll {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;
        }
    }
    Ok(())
}

/// Hand a record to the inference loop, waiting while the channel is full.
///
/// Returns false when the record can no longer be delivered.
fn forward(sender: &Sender<RawRecord>, mut record: RawRecord, running: &AtomicBool) -> bool {
    loop {
        match sender.send_timeout(record, SEND_RETRY) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if !running.load(Ordering::SeqCst) {
                    return false;
                }
                record = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_start_at_latest_without_stored_offsets() {
        assert!(matches!(START_OFFSET, FetchOffset::Latest));
        assert!(OFFSET_STORAGE.is_none());
    }

    #[test]
    fn test_forward_delivers_in_order() {
        let (sender, receiver) = bounded(4);
        let running = AtomicBool::new(true);

        assert!(forward(&sender, RawRecord::from_value("1,2,3,4,5,6"), &running));
        assert!(forward(&sender, RawRecord::from_value("6,5,4,3,2,1"), &running));

        assert_eq!(receiver.recv().unwrap().value, b"1,2,3,4,5,6".to_vec());
        assert_eq!(receiver.recv().unwrap().value, b"6,5,4,3,2,1".to_vec());
    }

    #[test]
    fn test_forward_gives_up_when_stopped_and_full() {
        let (sender, _receiver) = bounded(1);
        let running = AtomicBool::new(true);
        assert!(forward(&sender, RawRecord::from_value("a"), &running));

        running.store(false, Ordering::SeqCst);
        assert!(!forward(&sender, RawRecord::from_value("b"), &running));
    }

    #[test]
    fn test_forward_fails_when_receiver_dropped() {
        let (sender, receiver) = bounded(1);
        drop(receiver);
        let running = AtomicBool::new(true);
        assert!(!forward(&sender, RawRecord::from_value("a"), &running));
    }
}

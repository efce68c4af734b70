//! Integration tests for the phone capture server

#[cfg(feature = "server")]
mod server_tests {
    use activity_sense::capture::{CaptureError, CsvRecorder, SampleSink, SinkStatus};
    use activity_sense::core::dataset::{load_samples, training_file};
    use activity_sense::server::{run, ServerConfig};
    use activity_sense::{ActivityLabel, Sample};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// A sink that blocks its caller, like a broker round trip.
    struct SlowSink {
        busy: Arc<AtomicBool>,
        stored: u64,
    }

    impl SampleSink for SlowSink {
        fn accept(&mut self, _sample: Sample) -> Result<SinkStatus, CaptureError> {
            self.busy.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(500));
            self.busy.store(false, Ordering::SeqCst);
            self.stored += 1;
            Ok(SinkStatus::Accepted)
        }

        fn stored(&self) -> u64 {
            self.stored
        }
    }

    fn local(warmup: u32) -> ServerConfig {
        ServerConfig::new(0, warmup).with_bind(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let recorder =
            CsvRecorder::create(dir.path(), ActivityLabel::Idle, Duration::from_secs(60)).unwrap();

        let server = run(local(50), Box::new(recorder))
            .await
            .expect("Failed to start server");

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", server.addr()))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());
        assert_eq!(body["capture"]["updates"], 0);
        assert_eq!(body["capture"]["finished"], false);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_records_collated_samples_after_warmup() {
        let dir = tempfile::tempdir().unwrap();
        let recorder =
            CsvRecorder::create(dir.path(), ActivityLabel::InHand, Duration::from_secs(60)).unwrap();

        let server = run(local(2), Box::new(recorder))
            .await
            .expect("Failed to start server");
        let base = format!("http://{}", server.addr());
        let client = reqwest::Client::new();

        let updates = [
            ("accel", "[9.0, 9.0, 9.0]"),
            ("gyro", "[8.0, 8.0, 8.0]"),
            ("accel", "[0.1, 0.2, 0.3]"),
            ("gyro", "[0.4, 0.5, 0.6]"),
            ("magnet", "[1.0, 1.0, 1.0]"),
        ];
        for (sensor, reading) in updates {
            let response = client
                .get(format!("{base}/{sensor}"))
                .header(sensor, reading)
                .send()
                .await
                .expect("Failed to send request");
            assert!(response.status().is_success());
            let text = response.text().await.unwrap();
            assert_eq!(text, format!("Received {sensor} data."));
        }

        let status = server.shutdown();
        assert_eq!(status.updates, 4);
        assert_eq!(status.stored, 2);

        let samples = load_samples(&training_file(dir.path(), ActivityLabel::InHand)).unwrap();
        assert_eq!(
            samples,
            vec![
                Sample::from_parts([0.1, 0.2, 0.3], [8.0, 8.0, 8.0]),
                Sample::from_parts([0.1, 0.2, 0.3], [0.4, 0.5, 0.6]),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_reading_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let recorder =
            CsvRecorder::create(dir.path(), ActivityLabel::Idle, Duration::from_secs(60)).unwrap();

        let server = run(local(0), Box::new(recorder))
            .await
            .expect("Failed to start server");
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{}/accel", server.addr()))
            .header("accel", "[1.0, 2.0]")
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status().as_u16(), 400);

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "INVALID_READING");

        let response = client
            .get(format!("http://{}/gyro", server.addr()))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status().as_u16(), 400);

        let status = server.shutdown();
        assert_eq!(status.updates, 0);
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_stall_other_requests() {
        let busy = Arc::new(AtomicBool::new(false));
        let sink = SlowSink {
            busy: busy.clone(),
            stored: 0,
        };

        let server = run(local(0), Box::new(sink))
            .await
            .expect("Failed to start server");
        let base = format!("http://{}", server.addr());
        let client = reqwest::Client::new();

        // Accel alone does not make a sample.
        let response = client
            .get(format!("{base}/accel"))
            .header("accel", "[1.0, 2.0, 3.0]")
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let slow = tokio::spawn({
            let client = client.clone();
            let url = format!("{base}/gyro");
            async move {
                client
                    .get(url)
                    .header("gyro", "[4.0, 5.0, 6.0]")
                    .send()
                    .await
                    .map(|r| r.status())
            }
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while !busy.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sink never started");

        let response = client
            .get(format!("{base}/magnet"))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        assert!(busy.load(Ordering::SeqCst), "request waited for the sink");

        let status = slow.await.unwrap().expect("Failed to send request");
        assert!(status.is_success());

        let status = server.shutdown();
        assert_eq!(status.stored, 1);
    }
}

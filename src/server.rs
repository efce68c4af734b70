//! HTTP server for receiving sensor readings from a phone.
//!
//! The phone app sends each sensor update as a GET request whose reading is
//! a JSON array in a request header named after the sensor:
//!
//! ```text
//! GET /accel   accel: [0.01, -0.98, 0.12]
//! GET /gyro    gyro:  [0.4, 0.0, -0.1]
//! GET /magnet  (accepted and ignored)
//! ```
//!
//! # Architecture
//!
//! ```text
//! Phone ──→ GET /accel, /gyro ──→ SensorCollator ──→ SampleSink
//!                                                    ├─ CsvRecorder (record)
//!                                                    └─ KafkaPublisher (relay)
//! ```

use crate::capture::{SampleSink, SinkStatus};
use crate::collector::collate::{SensorCollator, SensorKind};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: IpAddr,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Updates discarded before samples reach the sink
    pub warmup_updates: u32,
}

impl ServerConfig {
    /// Listen on every interface, so a phone on the same network can connect.
    pub fn new(port: u16, warmup_updates: u32) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            warmup_updates,
        }
    }

    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }
}

/// Collation state and the sink samples go to.
struct CaptureSession {
    collator: SensorCollator,
    sink: Box<dyn SampleSink>,
    finished: bool,
}

impl CaptureSession {
    /// Feed one reading through the collator. Returns true when capture has
    /// just ended.
    fn update(&mut self, kind: SensorKind, reading: [f64; 3]) -> bool {
        if self.finished {
            return false;
        }

        let Some(sample) = self.collator.update(kind, reading) else {
            return false;
        };

        match self.sink.accept(sample) {
            Ok(SinkStatus::Accepted) => false,
            Ok(SinkStatus::Finished) => {
                self.close();
                true
            }
            Err(e) => {
                tracing::error!("Sample sink failed: {}", e);
                self.close();
                true
            }
        }
    }

    fn close(&mut self) {
        self.finished = true;
        if let Err(e) = self.sink.finish() {
            tracing::error!("Failed to finish capture: {}", e);
        }
    }
}

/// Shared server state
pub struct ServerState {
    session: Mutex<CaptureSession>,
    done: Notify,
}

impl ServerState {
    fn new(config: &ServerConfig, sink: Box<dyn SampleSink>) -> Self {
        Self {
            session: Mutex::new(CaptureSession {
                collator: SensorCollator::new(config.warmup_updates),
                sink,
                finished: false,
            }),
            done: Notify::new(),
        }
    }

    fn status(&self) -> CaptureStatus {
        match self.session.lock() {
            Ok(session) => CaptureStatus {
                updates: session.collator.update_count(),
                warmed_up: session.collator.is_warmed_up(),
                stored: session.sink.stored(),
                finished: session.finished,
            },
            Err(_) => CaptureStatus {
                updates: 0,
                warmed_up: false,
                stored: 0,
                finished: true,
            },
        }
    }

    /// Feed one reading through the session. Returns true when capture has
    /// just ended.
    fn update(&self, kind: SensorKind, reading: [f64; 3]) -> Result<bool, ApiError> {
        let mut session = self.session.lock().map_err(|_| session_unavailable())?;
        Ok(session.update(kind, reading))
    }

    /// End capture early, flushing the sink.
    fn close(&self) {
        if let Ok(mut session) = self.session.lock() {
            if !session.finished {
                session.close();
            }
        }
        self.done.notify_one();
    }
}

/// Progress of the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureStatus {
    /// Sensor updates received, including warm-up
    pub updates: u64,
    pub warmed_up: bool,
    /// Samples accepted by the sink
    pub stored: u64,
    pub finished: bool,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub capture: CaptureStatus,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn session_unavailable() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Capture session unavailable".to_string(),
            code: "SESSION_UNAVAILABLE".to_string(),
        }),
    )
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capture: state.status(),
    })
}

/// GET /accel
async fn accel(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<&'static str, ApiError> {
    receive(state, SensorKind::Accel, &headers).await?;
    Ok("Received accel data.")
}

/// GET /gyro
async fn gyro(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Result<&'static str, ApiError> {
    receive(state, SensorKind::Gyro, &headers).await?;
    Ok("Received gyro data.")
}

/// GET /magnet
async fn magnet() -> &'static str {
    "Received magnet data."
}

async fn receive(
    state: Arc<ServerState>,
    kind: SensorKind,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    let reading = parse_reading(kind, headers)?;

    // Sinks write files or wait on the broker.
    let session = state.clone();
    let just_finished = tokio::task::spawn_blocking(move || session.update(kind, reading))
        .await
        .map_err(|_| session_unavailable())??;

    if just_finished {
        state.done.notify_one();
    }
    Ok(())
}

/// Read the `[x, y, z]` array from the header named after the sensor.
fn parse_reading(kind: SensorKind, headers: &HeaderMap) -> Result<[f64; 3], ApiError> {
    let bad_request = |error: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error,
                code: "INVALID_READING".to_string(),
            }),
        )
    };

    let raw = headers
        .get(kind.as_str())
        .ok_or_else(|| bad_request(format!("Missing {} header", kind)))?
        .to_str()
        .map_err(|_| bad_request(format!("{} header is not text", kind)))?;

    let values: Vec<f64> = serde_json::from_str(raw)
        .map_err(|e| bad_request(format!("Invalid {} reading: {}", kind, e)))?;

    match values.as_slice() {
        [x, y, z, ..] => Ok([*x, *y, *z]),
        _ => Err(bad_request(format!(
            "{} reading needs 3 values, got {}",
            kind,
            values.len()
        ))),
    }
}

/// A running capture server.
pub struct CaptureServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl CaptureServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn status(&self) -> CaptureStatus {
        self.state.status()
    }

    /// Resolves once the sink has finished.
    pub async fn finished(&self) {
        self.state.done.notified().await;
    }

    /// Flush the sink and stop serving.
    pub fn shutdown(mut self) -> CaptureStatus {
        self.state.close();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.state.status()
    }
}

/// Run the HTTP server
pub async fn run(config: ServerConfig, sink: Box<dyn SampleSink>) -> anyhow::Result<CaptureServer> {
    let state = Arc::new(ServerState::new(&config, sink));

    let app = Router::new()
        .route("/health", get(health))
        .route("/accel", get(accel))
        .route("/gyro", get(gyro))
        .route("/magnet", get(magnet))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state.clone());

    let addr = SocketAddr::new(config.bind, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Capture server listening on http://{}", actual_addr);
    if config.warmup_updates > 0 {
        tracing::info!(
            "The first {} sensor readings will be ignored to give you time to get the phone in position",
            config.warmup_updates
        );
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(CaptureServer {
        addr: actual_addr,
        state,
        shutdown_tx: Some(shutdown_tx),
    })
}

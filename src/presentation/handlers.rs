// HTTP request handlers
use crate::application::device_service::DeviceHandle;
use crate::domain::cycle::CycleRecord;
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::infrastructure::status_stream::{device_deltas, ndjson_stream};
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SampleRequest {
    /// Number, or a boolean for on/off inputs
    pub value: Value,
    /// Epoch milliseconds, defaults to now
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleResponse {
    pub completed_cycle: Option<CycleRecord>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

async fn respond<T: Serialize + ?Sized>(status: StatusCode, data: &T, compress: bool) -> Response {
    match json_response(status, data, compress).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

async fn error(status: StatusCode, message: String) -> Response {
    let body = ErrorBody {
        status: status.as_u16(),
        message,
    };
    respond(status, &body, false).await
}

async fn unknown_device(id: &str) -> Response {
    error(StatusCode::NOT_FOUND, format!("Unknown device {}", id)).await
}

async fn device_failure(device: &DeviceHandle, e: anyhow::Error) -> Response {
    tracing::error!("Error from device {}: {:#}", device.id, e);
    error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).await
}

fn sample_value(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(on) => Some(if *on { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// List configured device ids
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Response {
    respond(StatusCode::OK, &state.registry.ids(), false).await
}

/// Completed cycles for a device within an optional time range
pub async fn get_history(
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let Some(device) = state.registry.get(&id) else {
        return unknown_device(&id).await;
    };

    match device.history(query.start, query.end).await {
        Ok(Ok(cycles)) => respond(StatusCode::OK, &cycles, compress).await,
        Ok(Err(e)) => {
            let status = StatusCode::from_u16(e.status).unwrap_or(StatusCode::BAD_REQUEST);
            respond(status, &e, compress).await
        }
        Err(e) => device_failure(device, e).await,
    }
}

/// Current statistics snapshot
pub async fn get_status(Path(id): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let Some(device) = state.registry.get(&id) else {
        return unknown_device(&id).await;
    };

    match device.snapshot().await {
        Ok(snapshot) => respond(StatusCode::OK, &snapshot, false).await,
        Err(e) => device_failure(device, e).await,
    }
}

/// Restart the "since" statistics at now
pub async fn reset_baseline(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(device) = state.registry.get(&id) else {
        return unknown_device(&id).await;
    };

    match device.reset_baseline().await {
        Ok(snapshot) => respond(StatusCode::OK, &snapshot, false).await,
        Err(e) => device_failure(device, e).await,
    }
}

/// Feed one sample to a device
pub async fn ingest_sample(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<SampleRequest>,
) -> Response {
    let Some(device) = state.registry.get(&id) else {
        return unknown_device(&id).await;
    };
    let Some(value) = sample_value(&request.value) else {
        return error(
            StatusCode::BAD_REQUEST,
            format!("Sample value {} is not a number", request.value),
        )
        .await;
    };

    match device.process_sample(value, request.timestamp).await {
        Ok(completed_cycle) => {
            respond(StatusCode::OK, &SampleResponse { completed_cycle }, false).await
        }
        Err(e) => device_failure(device, e).await,
    }
}

/// Live status deltas for a device as newline-delimited JSON
pub async fn stream_status(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if state.registry.get(&id).is_none() {
        return unknown_device(&id).await;
    }

    let rx = state.status_tx.subscribe();
    let mut shutdown = state.shutdown.clone();
    let stopping = async move {
        let _ = shutdown.wait_for(|stopping| *stopping).await;
    };
    match ndjson_stream(device_deltas(rx, id).take_until(stopping)) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::testing::ManualClock;
    use crate::application::device_monitor::DeviceMonitor;
    use crate::application::device_service::{DeviceRegistry, spawn_device};
    use crate::domain::snapshot::{Delta, DeltaValue};
    use crate::infrastructure::config::DeviceConfig;
    use axum::http::{HeaderValue, header};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{broadcast, watch};
    use tokio::task::JoinHandle;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        _dir: TempDir,
        state: Arc<AppState>,
        task: JoinHandle<()>,
        shutdown_tx: watch::Sender<bool>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = DeviceConfig {
                name: "Bilge pump".to_string(),
                stats_path: String::new(),
                sec_report_interval: 30,
                sec_timeout: 300,
                sec_checkpoint: 60,
                noise_margin: 0.1,
                history_capacity: 10,
            };
            let clock = Arc::new(ManualClock::new(T0 + 60_000));
            let monitor = DeviceMonitor::open(&config, dir.path(), T0).unwrap();
            let (handle, task) = spawn_device(monitor, Duration::from_secs(3600), clock, Vec::new());
            let (status_tx, _) = broadcast::channel(16);
            let (shutdown_tx, shutdown) = watch::channel(false);

            let state = Arc::new(AppState {
                registry: DeviceRegistry::new(vec![handle]),
                status_tx,
                shutdown,
            });
            Self {
                _dir: dir,
                state,
                task,
                shutdown_tx,
            }
        }

        async fn stop(self) {
            self.state.registry.shutdown_all().await;
            self.task.await.unwrap();
        }
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn sample(fixture: &Fixture, value: Value, timestamp: i64) -> Response {
        ingest_sample(
            Path("bilgePump".to_string()),
            State(fixture.state.clone()),
            Json(SampleRequest {
                value,
                timestamp: Some(timestamp),
            }),
        )
        .await
    }

    fn history_query(start: Option<&str>, end: Option<&str>) -> Query<HistoryQuery> {
        Query(HistoryQuery {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_list_devices() {
        let fixture = Fixture::new();
        let response = list_devices(State(fixture.state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!(["bilgePump"]));
        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_samples_then_history() {
        let fixture = Fixture::new();

        let response = sample(&fixture, serde_json::json!(true), T0 + 1_000).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["completedCycle"], Value::Null);

        let response = sample(&fixture, serde_json::json!(0.05), T0 + 3_500).await;
        let body = body_json(response).await;
        assert_eq!(body["completedCycle"]["date"], T0 + 1_000);
        assert_eq!(body["completedCycle"]["runSec"], 2.5);

        let response = get_history(
            Path("bilgePump".to_string()),
            history_query(Some(&T0.to_string()), None),
            HeaderMap::new(),
            State(fixture.state.clone()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!([{ "date": T0 + 1_000, "runSec": 2.5 }])
        );

        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_history_bad_bound() {
        let fixture = Fixture::new();
        let response = get_history(
            Path("bilgePump".to_string()),
            history_query(None, Some("yesterday-ish")),
            HeaderMap::new(),
            State(fixture.state.clone()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "status": 400, "message": "Can't parse yesterday-ish as date/time" })
        );
        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_history_brotli() {
        let fixture = Fixture::new();
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("br"));

        let response = get_history(
            Path("bilgePump".to_string()),
            history_query(None, None),
            headers,
            State(fixture.state.clone()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "br");
        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let fixture = Fixture::new();

        let response = get_status(Path("shower".to_string()), State(fixture.state.clone())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["message"], "Unknown device shower");

        let response = ingest_sample(
            Path("shower".to_string()),
            State(fixture.state.clone()),
            Json(SampleRequest {
                value: serde_json::json!(1),
                timestamp: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response =
            stream_status(Path("shower".to_string()), State(fixture.state.clone())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_non_numeric_sample_rejected() {
        let fixture = Fixture::new();
        let response = sample(&fixture, serde_json::json!("on"), T0).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], 400);
        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let fixture = Fixture::new();
        sample(&fixture, serde_json::json!(1), T0 + 1_000).await;
        sample(&fixture, serde_json::json!(0), T0 + 2_000).await;

        let response =
            get_status(Path("bilgePump".to_string()), State(fixture.state.clone())).await;
        let body = body_json(response).await;
        assert_eq!(body["status"], "STOPPED");
        assert_eq!(body["sinceCycles"], 1);

        let response =
            reset_baseline(Path("bilgePump".to_string()), State(fixture.state.clone())).await;
        let body = body_json(response).await;
        assert_eq!(body["sinceCycles"], 0);
        assert_eq!(body["since"], T0 + 60_000);

        fixture.stop().await;
    }

    #[tokio::test]
    async fn test_stream_status_forwards_device_deltas() {
        let fixture = Fixture::new();
        let response =
            stream_status(Path("bilgePump".to_string()), State(fixture.state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let delta = Delta {
            device_id: "bilgePump".to_string(),
            values: vec![DeltaValue {
                path: "Bilge pump.status".to_string(),
                value: serde_json::json!("RUNNING"),
            }],
        };
        fixture.state.status_tx.send(delta).unwrap();

        fixture.shutdown_tx.send(true).unwrap();
        fixture.stop().await;

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let line: Value = serde_json::from_slice(body.strip_suffix(b"\n").unwrap()).unwrap();
        assert_eq!(line["values"][0]["value"], "RUNNING");
    }
}

//! Telemetry fetch against a local HTTP server.

use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use lightwise_registry::{RegistryError, TelemetryClient, TelemetryConfig};
use serde_json::json;
use tokio::net::TcpListener;

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn real_client(api_base: String, api_key: Option<&str>) -> TelemetryClient {
    TelemetryClient::new(TelemetryConfig {
        use_mock: false,
        api_base: Some(api_base),
        api_key: api_key.map(str::to_string),
    })
    .unwrap()
}

#[tokio::test]
async fn test_fetch_sends_api_key_and_parses_record() {
    let router = Router::new().route(
        "/telemetry",
        get(|headers: HeaderMap| async move {
            if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("secret") {
                return Err(StatusCode::UNAUTHORIZED);
            }
            Ok(Json(json!({
                "poleId": "LW-007",
                "timestamp": "2026-01-02T03:04:05Z",
                "ambientLux": 12.5,
                "motion": 1,
                "tempC": null,
                "rssi": -67
            })))
        }),
    );
    let base = serve(router).await;

    let record = real_client(base, Some("secret")).fetch().await.unwrap();
    assert_eq!(record.pole_id, "LW-007");
    assert_eq!(record.ambient_lux, Some(12.5));
    assert_eq!(record.motion, Some(1.0));
    assert_eq!(record.temp_c, None);
    assert_eq!(record.humidity, None);
    assert_eq!(record.rssi, Some(-67));
}

#[tokio::test]
async fn test_non_success_status_is_api_error() {
    let router = Router::new().route(
        "/telemetry",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let base = serve(router).await;

    let result = real_client(base, None).fetch().await;
    assert!(matches!(result, Err(RegistryError::Api { status: 503 })));
}

#[tokio::test]
async fn test_wrong_key_is_api_error() {
    let router = Router::new().route(
        "/telemetry",
        get(|headers: HeaderMap| async move {
            if headers.contains_key("x-api-key") {
                StatusCode::FORBIDDEN
            } else {
                StatusCode::UNAUTHORIZED
            }
        }),
    );
    let base = serve(router).await;

    let result = real_client(base, None).fetch().await;
    assert!(matches!(result, Err(RegistryError::Api { status: 401 })));
}

#[tokio::test]
async fn test_malformed_body_is_http_error() {
    let router = Router::new().route("/telemetry", get(|| async { "not json" }));
    let base = serve(router).await;

    let result = real_client(base, None).fetch().await;
    assert!(matches!(result, Err(RegistryError::Http(_))));
}

#[tokio::test]
async fn test_unreachable_api_is_http_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = real_client(base, None).fetch().await;
    assert!(matches!(result, Err(RegistryError::Http(_))));
}

//! API Integration Tests
//!
//! In-process tests that load an engine from artifacts on disk, build the
//! Axum app via `create_app()` and drive it with
//! `tower::ServiceExt::oneshot()`. No binary spawn, no network port.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tower::ServiceExt;

use rotorwatch::api::{create_app, ServeState};
use rotorwatch::config::{ModelConfig, ServerConfig};
use rotorwatch::model::{weights, FaultClassifier};
use rotorwatch::registry::ClassRegistry;
use rotorwatch::InferenceEngine;

const CHUNK: usize = 128;

fn app_with_engine(dir: &std::path::Path) -> axum::Router {
    let config = ModelConfig {
        weights_path: dir.join("fault_detector.safetensors"),
        registry_path: dir.join("class_mapping.txt"),
        expected_samples: CHUNK,
        fallback_label: "healthy".to_string(),
    };
    let registry = ClassRegistry::from_names(["bearing", "belt", "flywheel", "healthy"]);
    let model = FaultClassifier::new(registry.len(), &mut StdRng::seed_from_u64(17)).unwrap();
    weights::save(&model, &config.weights_path).unwrap();
    registry.save(&config.registry_path).unwrap();

    let engine = InferenceEngine::load(&config).unwrap();
    create_app(ServeState::new(engine), &ServerConfig::default())
}

fn predict_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict-real-time")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_loaded_model() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_engine(dir.path());

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["status"], "healthy");
    assert_eq!(v["service"], "rotorwatch");
    assert_eq!(v["expected_sample_count"], CHUNK);
    assert_eq!(v["num_classes"], 4);
    assert_eq!(v["classes"][2], "flywheel");
    assert!(v["started_at"].is_string());
}

#[tokio::test]
async fn test_index_describes_service() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_engine(dir.path());

    let resp = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert_eq!(v["expected_sample_count"], CHUNK);
    assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_predict_is_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_engine(dir.path());
    let samples: Vec<f32> = (0..CHUNK).map(|i| (i as f32 * 0.17).sin() * 0.4).collect();
    let body = serde_json::json!({ "samples": samples, "deviceId": "motor-3" }).to_string();

    let first = json_body(app.clone().oneshot(predict_request(body.clone())).await.unwrap()).await;
    let second = json_body(app.oneshot(predict_request(body)).await.unwrap()).await;

    assert_eq!(first["success"], true);
    assert_eq!(first["deviceId"], "motor-3");
    assert_eq!(first["fallback"], false);
    assert_eq!(first["label"], second["label"]);
    assert_eq!(first["confidence"], second["confidence"]);
    let label = first["label"].as_str().unwrap();
    assert!(["bearing", "belt", "flywheel", "healthy"].contains(&label));
}

#[tokio::test]
async fn test_predict_wrong_length_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_engine(dir.path());
    let body = serde_json::json!({ "samples": vec![0.0_f32; CHUNK + 1], "deviceId": "motor-3" })
        .to_string();

    let resp = app.oneshot(predict_request(body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let v = json_body(resp).await;
    assert_eq!(v["success"], false);
    assert_eq!(v["deviceId"], "motor-3");
    assert_eq!(v["code"], "BAD_REQUEST");
    assert_eq!(v["detail"], format!("expected {CHUNK} samples, got {}", CHUNK + 1));
}

#[tokio::test]
async fn test_predict_missing_samples_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_engine(dir.path());

    let resp = app
        .oneshot(predict_request(r#"{"deviceId":"motor-3"}"#.to_string()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = json_body(resp).await;
    assert_eq!(v["success"], false);
}

#[tokio::test]
async fn test_predict_without_device_id() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with_engine(dir.path());
    let body = serde_json::json!({ "samples": vec![1.5_f32; CHUNK] }).to_string();

    let resp = app.oneshot(predict_request(body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = json_body(resp).await;
    assert_eq!(v["success"], true);
    assert!(v["deviceId"].is_null());
}

//! HTTP handlers for the serving layer.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::envelope::ApiErrorResponse;
use crate::inference::InferenceEngine;

pub const SERVICE_NAME: &str = "rotorwatch";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ServeState {
    pub engine: Arc<InferenceEngine>,
    pub started_at: DateTime<Utc>,
}

impl ServeState {
    pub fn new(engine: InferenceEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            started_at: Utc::now(),
        }
    }
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub samples: Vec<f32>,
    #[serde(rename = "deviceId", default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub label: String,
    pub success: bool,
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    pub confidence: f32,
    /// `true` when the model's class index had no registry entry.
    pub fallback: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub expected_sample_count: usize,
    pub num_classes: usize,
    pub classes: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub expected_sample_count: usize,
    pub endpoint: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// `GET /`
pub async fn get_info(State(state): State<ServeState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        expected_sample_count: state.engine.expected_samples(),
        endpoint: "POST /predict-real-time".to_string(),
    })
}

/// `GET /health`
pub async fn get_health(State(state): State<ServeState>) -> Json<HealthResponse> {
    let registry = state.engine.registry();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        expected_sample_count: state.engine.expected_samples(),
        num_classes: registry.len(),
        classes: registry.names().to_vec(),
        started_at: state.started_at,
    })
}

/// `POST /predict-real-time`
///
/// The forward pass runs on the blocking pool; the async worker only parses
/// JSON and formats the answer.
pub async fn predict_real_time(
    State(state): State<ServeState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Response {
    let Json(PredictRequest { samples, device_id }) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected prediction request");
            return ApiErrorResponse::from_rejection(&rejection);
        }
    };

    let expected = state.engine.expected_samples();
    if samples.len() != expected {
        warn!(
            device_id = device_id.as_deref().unwrap_or("-"),
            expected,
            got = samples.len(),
            "Wrong sample count"
        );
        return ApiErrorResponse::bad_request(
            device_id,
            format!("expected {expected} samples, got {}", samples.len()),
        );
    }

    let engine = Arc::clone(&state.engine);
    let outcome = tokio::task::spawn_blocking(move || engine.predict(&samples)).await;

    match outcome {
        Ok(Ok(prediction)) => {
            info!(
                device_id = device_id.as_deref().unwrap_or("-"),
                label = %prediction.label,
                confidence = prediction.confidence,
                fallback = prediction.fallback,
                "Prediction"
            );
            Json(PredictResponse {
                label: prediction.label,
                success: true,
                device_id,
                confidence: prediction.confidence,
                fallback: prediction.fallback,
            })
            .into_response()
        }
        Ok(Err(e)) if e.is_client_error() => {
            warn!(device_id = device_id.as_deref().unwrap_or("-"), error = %e, "Invalid prediction input");
            ApiErrorResponse::bad_request(device_id, e.to_string())
        }
        Ok(Err(e)) => {
            error!(device_id = device_id.as_deref().unwrap_or("-"), error = %e, "Prediction failed");
            ApiErrorResponse::internal(device_id, "prediction failed")
        }
        Err(e) => {
            error!(device_id = device_id.as_deref().unwrap_or("-"), error = %e, "Prediction task aborted");
            ApiErrorResponse::internal(device_id, "prediction failed")
        }
    }
}

/// Small engine for handler and route tests: 64-sample chunks, two classes.
#[cfg(test)]
pub(crate) fn test_state() -> ServeState {
    use crate::model::FaultClassifier;
    use crate::registry::ClassRegistry;
    use rand::{rngs::StdRng, SeedableRng};

    let registry = ClassRegistry::from_names(["belt", "healthy"]);
    let model = FaultClassifier::new(registry.len(), &mut StdRng::seed_from_u64(5)).unwrap();
    ServeState::new(InferenceEngine::from_parts(model, registry, 64).unwrap())
}

//! Error envelope shared by every endpoint.
//!
//! Failures are `{ "success": false, "deviceId"?, "code", "detail" }` so
//! device firmware can branch on `success` without looking at the status.
//! Handlers build the envelope directly; bare error responses from routing
//! and middleware (404, 405, 408, 413) are rewritten by [`wrap_bare_errors`].

use axum::extract::rejection::JsonRejection;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub code: String,
    pub detail: String,
}

impl ApiErrorResponse {
    fn build(
        status: StatusCode,
        code: &str,
        device_id: Option<String>,
        detail: impl Into<String>,
    ) -> Response {
        let body = Self {
            success: false,
            device_id,
            code: code.to_string(),
            detail: detail.into(),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn bad_request(device_id: Option<String>, detail: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "BAD_REQUEST", device_id, detail)
    }

    pub fn internal(device_id: Option<String>, detail: impl Into<String>) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", device_id, detail)
    }

    /// Map a JSON extractor failure. An oversized body keeps its 413; every
    /// other rejection (bad syntax, wrong types, missing fields) is a 400.
    pub fn from_rejection(rejection: &JsonRejection) -> Response {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::build(
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                None,
                rejection.body_text(),
            )
        } else {
            Self::bad_request(None, rejection.body_text())
        }
    }
}

/// Response mapper for `axum::middleware::map_response`: any error status
/// whose body is not already JSON gets the envelope.
pub async fn wrap_bare_errors(response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json {
        return response;
    }

    let (code, detail) = match status {
        StatusCode::NOT_FOUND => ("NOT_FOUND", "no such route"),
        StatusCode::METHOD_NOT_ALLOWED => ("METHOD_NOT_ALLOWED", "method not allowed on this route"),
        StatusCode::REQUEST_TIMEOUT => ("TIMEOUT", "request timed out"),
        StatusCode::PAYLOAD_TOO_LARGE => ("PAYLOAD_TOO_LARGE", "request body too large"),
        _ => ("ERROR", status.canonical_reason().unwrap_or("request failed")),
    };
    ApiErrorResponse::build(status, code, None, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;
    use tower_http::timeout::TimeoutLayer;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_bad_request_shape() {
        let resp = ApiErrorResponse::bad_request(Some("pump-7".into()), "expected 38400 samples, got 3");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let v = body_json(resp).await;
        assert_eq!(v["success"], false);
        assert_eq!(v["deviceId"], "pump-7");
        assert_eq!(v["code"], "BAD_REQUEST");
        assert_eq!(v["detail"], "expected 38400 samples, got 3");
    }

    #[tokio::test]
    async fn test_device_id_omitted_when_unknown() {
        let resp = ApiErrorResponse::internal(None, "prediction failed");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let v = body_json(resp).await;
        assert!(v.get("deviceId").is_none());
        assert_eq!(v["detail"], "prediction failed");
    }

    #[tokio::test]
    async fn test_timeout_gets_envelope() {
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .layer(TimeoutLayer::new(Duration::from_millis(50)))
            .layer(axum::middleware::map_response(wrap_bare_errors));

        let resp = app
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);

        let v = body_json(resp).await;
        assert_eq!(v["success"], false);
        assert_eq!(v["code"], "TIMEOUT");
    }

    #[tokio::test]
    async fn test_json_errors_pass_through() {
        let resp = wrap_bare_errors(ApiErrorResponse::bad_request(Some("fan-1".into()), "bad")).await;
        let v = body_json(resp).await;
        assert_eq!(v["deviceId"], "fan-1");
        assert_eq!(v["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_success_untouched() {
        let resp = wrap_bare_errors((StatusCode::OK, "fine").into_response()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"fine");
    }
}

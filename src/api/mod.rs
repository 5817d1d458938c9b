//! REST API module using Axum
//!
//! One prediction endpoint plus service metadata. All handlers share a
//! [`ServeState`] holding the immutable [`InferenceEngine`](crate::inference::InferenceEngine).

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::ServeState;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

/// Create the complete application router.
pub fn create_app(state: ServeState, server: &ServerConfig) -> Router {
    Router::new()
        .merge(routes::service_routes(state))
        // axum's own 2 MB default is replaced by the configured limit
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
        .layer(axum::middleware::map_response(envelope::wrap_bare_errors))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_body_limit_enforced() {
        let server = ServerConfig { max_body_bytes: 256, ..ServerConfig::default() };
        let app = create_app(handlers::test_state(), &server);

        let samples = vec![0.5_f32; 64];
        let body = serde_json::json!({ "samples": samples, "deviceId": "d" }).to_string();
        assert!(body.len() > 256);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/predict-real-time")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_large_body_under_limit_accepted() {
        // 38 400 floats exceed axum's 2 MB default once formatted verbosely.
        let server = ServerConfig { max_body_bytes: 8 * 1024 * 1024, ..ServerConfig::default() };
        let app = create_app(handlers::test_state(), &server);

        let mut body = String::from("{\"deviceId\":\"d\",\"samples\":[");
        for i in 0..64 {
            if i > 0 {
                body.push(',');
            }
            body.push_str(&format!("{:.1}{}", i as f32 * 0.1, "0".repeat(40_000)));
        }
        body.push_str("]}");
        assert!(body.len() > 2 * 1024 * 1024);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/predict-real-time")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_route_gets_envelope() {
        let app = create_app(handlers::test_state(), &ServerConfig::default());
        let response = app
            .oneshot(Request::builder().uri("/predict").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let v = body_json(response).await;
        assert_eq!(v["success"], false);
        assert_eq!(v["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_wrong_method_gets_envelope() {
        let app = create_app(handlers::test_state(), &ServerConfig::default());
        let response = app
            .oneshot(Request::builder().uri("/predict-real-time").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let v = body_json(response).await;
        assert_eq!(v["success"], false);
        assert_eq!(v["code"], "METHOD_NOT_ALLOWED");
    }
}

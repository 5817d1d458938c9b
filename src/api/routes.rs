//! Route table
//!
//! - `GET /` - service description
//! - `GET /health` - liveness plus loaded model summary
//! - `POST /predict-real-time` - classify one raw chunk

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ServeState};

pub fn service_routes(state: ServeState) -> Router {
    Router::new()
        .route("/", get(handlers::get_info))
        .route("/health", get(handlers::get_health))
        .route("/predict-real-time", post(handlers::predict_real_time))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_state;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn post_json(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict-real-time")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_route() {
        let app = service_routes(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_index_route() {
        let app = service_routes(test_state());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_predict_route() {
        let samples: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let body = serde_json::json!({ "samples": samples, "deviceId": "d1" }).to_string();
        let response = service_routes(test_state()).oneshot(post_json(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_predict_malformed_json() {
        let response = service_routes(test_state())
            .oneshot(post_json("{\"samples\": [1.0, 2.0".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["success"], false);
        assert!(!v["detail"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_predict_nested_array_rejected() {
        let body = serde_json::json!({ "samples": [[1.0, 2.0], [3.0]], "deviceId": "d1" }).to_string();
        let response = service_routes(test_state()).oneshot(post_json(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = service_routes(test_state())
            .oneshot(Request::builder().uri("/predict").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

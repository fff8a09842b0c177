//! Routing and error shape of the HTTP API, through axum's tower service
//! interface (no TCP). The pool points at a closed port, so every query
//! fails fast.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use scm_daemon::api::{self, ApiState};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

fn unreachable_app() -> axum::Router {
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy("postgres://scm@127.0.0.1:1/none")
        .unwrap();
    api::app(ApiState::new(pool))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        let text = String::from_utf8_lossy(&bytes);
        panic!("not valid JSON: {text}");
    })
}

#[tokio::test]
async fn unknown_interval_is_a_bad_request() {
    let resp = unreachable_app()
        .oneshot(get("/api/esno?interval=fortnight"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let resp = unreachable_app().oneshot(get("/api/nothing")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn database_failure_is_a_json_500() {
    for uri in ["/api/esno?interval=hour", "/api/modcod", "/api/watchdog"] {
        let resp = unreachable_app().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
        let body = json_body(resp).await;
        assert!(body["error"].is_string(), "{uri}: {body}");
    }
}

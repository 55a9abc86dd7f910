//! Integration tests for health probes and the metrics endpoint.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use roster::config::Config;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn spawn_app() -> (Router, std::path::PathBuf) {
    let db_path =
        std::env::temp_dir().join(format!("roster-system-test-{}.db", uuid::Uuid::new_v4()));

    let mut config = Config::default();
    config.general.database_url = format!("sqlite:{}", db_path.display());
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;

    let state = roster::api::create_app_state_from_config(config, None)
        .await
        .expect("Failed to create app state");

    (roster::api::router(state), db_path)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_live() {
    let (app, db_path) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health/live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "alive"}));

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_health_ready() {
    let (app, db_path) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"status": "ready", "database": true})
    );

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_metrics_disabled_returns_not_found() {
    let (app, db_path) = spawn_app().await;

    let register = Request::builder()
        .method("POST")
        .uri("/api/users/register/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "username": "ops",
                "email": "ops@x.com",
                "first_name": "Ops",
                "last_name": "Team",
                "password": "Monitoring-2026"
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(register).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let token = json_body(response).await["token"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/metrics")
                .header(header::AUTHORIZATION, format!("Token {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    std::fs::remove_file(db_path).ok();
}

#[tokio::test]
async fn test_unknown_route() {
    let (app, db_path) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/nothing-here")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    std::fs::remove_file(db_path).ok();
}

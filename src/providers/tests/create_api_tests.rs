// src/providers/tests/create_api_tests.rs

use super::super::create_api::{CreateApi, Generator};
use crate::error::ApiError;

#[tokio::test]
async fn test_generate_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/generate-external-api")
        .match_header("X-API-Key", "secret")
        .match_body(mockito::Matcher::Json(serde_json::json!({
            "prompt": "a castle in the clouds",
            "x_username": "alice"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"link":"https://cdn.example/c.png","share_url":"https://create.example/s/1","id":17,"media_type":"image","prompt":"a castle in the clouds"}"#)
        .create_async()
        .await;

    let api = CreateApi::new("secret", &server.url());
    let generation = api.generate("a castle in the clouds", "alice").await.unwrap();

    mock.assert_async().await;
    assert_eq!(generation.link.as_deref(), Some("https://cdn.example/c.png"));
    assert_eq!(generation.share_url.as_deref(), Some("https://create.example/s/1"));
    assert_eq!(generation.media_type.as_deref(), Some("image"));
}

#[tokio::test]
async fn test_generate_account_not_linked() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/generate-external-api")
        .with_status(404)
        .with_body(r#"{"error":"X account not found or not linked"}"#)
        .create_async()
        .await;

    let api = CreateApi::new("secret", &server.url());
    let result = api.generate("draw a cat", "bob").await;
    assert!(matches!(result, Err(ApiError::AccountNotLinked)));
}

#[tokio::test]
async fn test_generate_other_failure_keeps_status() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/generate-external-api")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let api = CreateApi::new("secret", &format!("{}/", server.url()));
    match api.generate("draw a cat", "bob").await {
        Err(ApiError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_fetch_random_creation() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/pull-random-liked-creation")
        .with_status(200)
        .with_body(r#"{"creation":{"prompt":"neon koi","display_name":"carol","link":"https://cdn.example/koi.png"}}"#)
        .create_async()
        .await;

    let api = CreateApi::new("secret", &server.url());
    let creation = api.fetch_random_creation().await.unwrap();
    assert!(creation.is_complete());
    assert_eq!(creation.display_name.as_deref(), Some("carol"));
}

#[tokio::test]
async fn test_fetch_random_creation_failure_is_none() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/pull-random-liked-creation")
        .with_status(503)
        .create_async()
        .await;

    let api = CreateApi::new("secret", &server.url());
    assert!(api.fetch_random_creation().await.is_none());
}

//! generateContent client against a wiremock server

use std::time::Duration;

use nekebot::ChatError;
use nekebot::client::{ContentGenerator, GeminiClient};

use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

const GENERATE_PATH: &str = "/v1beta/models/gemini-2.0-flash:generateContent";

fn client(server: &MockServer) -> GeminiClient {
    GeminiClient::new(
        &server.uri(),
        "gemini-2.0-flash",
        "test-key",
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_generate_returns_candidate_text() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [ { "parts": [ { "text": "What is Rust?" } ] } ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [ { "text": "A systems " }, { "text": "language." } ]
                },
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let text = client(&mock_server).generate("What is Rust?").await.unwrap();
    assert_eq!(text, "A systems language.");
}

#[tokio::test]
async fn test_generate_surfaces_api_error_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "status": "INVALID_ARGUMENT"
            }
        })))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server).generate("hi").await.unwrap_err();
    match err {
        ChatError::Upstream { status, message } => {
            assert_eq!(status, 400);
            assert!(message.starts_with("INVALID_ARGUMENT: "));
            assert!(message.contains("API key not valid"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_generate_falls_back_to_status_reason() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server).generate("hi").await.unwrap_err();
    assert!(matches!(err, ChatError::Upstream { status: 503, .. }));
}

#[tokio::test]
async fn test_generate_rejects_response_without_candidates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server).generate("hi").await.unwrap_err();
    assert!(matches!(err, ChatError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_generate_rejects_non_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server).generate("hi").await.unwrap_err();
    assert!(matches!(err, ChatError::MalformedResponse(_)));
}

#[test]
fn test_endpoint_trims_trailing_slash() {
    let client = GeminiClient::new(
        "https://example.test/",
        "gemini-pro",
        "k",
        Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(
        client.endpoint(),
        "https://example.test/v1beta/models/gemini-pro:generateContent"
    );
}

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::ChatError;

// generateContent request format
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
}

impl GenerateRequest {
    pub fn from_prompt(prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: None,
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// generateContent response format
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Candidate {
    pub content: Option<Content>,
    #[serde(rename = "finishReason", default)]
    pub finish_reason: Option<String>,
}

impl GenerateResponse {
    pub fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }

    /// Text of the first candidate, parts joined in order.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        Some(
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>(),
        )
    }
}

// Error body returned with non-2xx statuses
#[derive(Deserialize, Debug)]
pub struct ApiErrorBody {
    pub error: ApiError,
}

#[derive(Deserialize, Debug)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

impl ApiError {
    /// `STATUS: message`, or whichever half is present. `None` when both are empty.
    pub fn describe(&self) -> Option<String> {
        match (self.status.is_empty(), self.message.is_empty()) {
            (true, true) => None,
            (true, false) => Some(self.message.clone()),
            (false, true) => Some(self.status.clone()),
            (false, false) => Some(format!("{}: {}", self.status, self.message)),
        }
    }
}

// Prompt job - holds the prompt + reply channel
pub struct PromptJob {
    pub prompt: String,
    pub reply_tx: oneshot::Sender<Result<String, ChatError>>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
    Error,
    Pending,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(id: u64, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Local wall-clock time, `HH:MM`.
    pub fn time_label(&self) -> String {
        self.timestamp.with_timezone(&Local).format("%H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format() {
        let json = serde_json::to_value(GenerateRequest::from_prompt("hi")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "contents": [ { "parts": [ { "text": "hi" } ] } ] })
        );
    }

    #[test]
    fn response_text_joins_parts() {
        let body = serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [ { "text": "Hello " }, { "text": "there" } ] },
                "finishReason": "STOP"
            }]
        });
        let response: GenerateResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.text().as_deref(), Some("Hello there"));
        assert_eq!(response.finish_reason(), Some("STOP"));
    }

    #[test]
    fn api_error_description() {
        let body: ApiErrorBody = serde_json::from_value(serde_json::json!({
            "error": { "code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED" }
        }))
        .unwrap();
        assert_eq!(
            body.error.describe().as_deref(),
            Some("RESOURCE_EXHAUSTED: Quota exceeded")
        );

        let bare: ApiErrorBody = serde_json::from_str(r#"{"error":{}}"#).unwrap();
        assert_eq!(bare.error.describe(), None);
    }

    #[test]
    fn response_without_candidates_has_no_text() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response.text(), None);
    }

    #[test]
    fn message_roles_serialize_lowercase() {
        let msg = Message::new(1, Role::Ai, "ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "ai");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}

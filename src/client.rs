use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::models::{ApiErrorBody, GenerateRequest, GenerateResponse};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Anything that turns a prompt into reply text.
pub trait ContentGenerator: Send + Sync + 'static {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// `generateContent` over HTTP.
pub struct GeminiClient {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_base: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        )
    }
}

impl ContentGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let res = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&GenerateRequest::from_prompt(prompt))
            .send()
            .await?;

        let status = res.status();
        let body = res.bytes().await?;
        debug!("generateContent returned {} ({} bytes)", status, body.len());

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.describe())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("Unknown error")
                        .to_string()
                });
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = serde_json::from_slice(&body)
            .map_err(|e| ChatError::MalformedResponse(e.to_string()))?;
        match parsed.finish_reason() {
            None | Some("STOP") => {}
            Some(reason) => warn!("Generation stopped early: {}", reason),
        }
        parsed
            .text()
            .ok_or_else(|| ChatError::MalformedResponse("no candidates in response".into()))
    }
}

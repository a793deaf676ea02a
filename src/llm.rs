//! Outbound LLM calls used by the AI report and chat endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API key is not configured")]
    NotConfigured,

    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM response had no content")]
    EmptyResponse,
}

impl From<LlmError> for ApiError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::NotConfigured => ApiError::Unavailable(
                "AI_NOT_CONFIGURED",
                "AI features are not configured on this server".into(),
            ),
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<String, LlmError>;
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    /// `timeout` bounds the whole upstream exchange, connect through body.
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    fn request_body(&self, req: &CompletionRequest) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": req.system },
                { "role": "user", "content": req.user },
            ],
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, req: CompletionRequest) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::NotConfigured)?;

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&self.request_body(&req))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = resp.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records prompts and answers with a canned reply.
    #[derive(Default)]
    pub struct FakeCompletion {
        pub reply: Option<String>,
        pub seen: Mutex<Vec<CompletionRequest>>,
    }

    impl FakeCompletion {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for FakeCompletion {
        async fn complete(&self, req: CompletionRequest) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(req);
            self.reply.clone().ok_or(LlmError::NotConfigured)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "You are an expert healthcare analyst.".into(),
            user: "Summarize.".into(),
            max_tokens: 2000,
            temperature: 0.3,
        }
    }

    #[tokio::test]
    async fn missing_key_is_reported_before_any_request() {
        let client =
            OpenAiClient::new("http://127.0.0.1:9".into(), None, "gpt-4".into(), Duration::from_secs(5)).unwrap();
        let err = client.complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured));
    }

    #[test]
    fn body_carries_both_messages_and_sampling() {
        let client = OpenAiClient::new(
            "https://api.openai.com/v1/".into(),
            Some("k".into()),
            "gpt-4".into(),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://api.openai.com/v1");

        let body = client.request_body(&request());
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Summarize.");
        assert_eq!(body["max_tokens"], 2000);
    }

    #[test]
    fn not_configured_maps_to_service_unavailable() {
        let api: ApiError = LlmError::NotConfigured.into();
        assert!(matches!(api, ApiError::Unavailable(..)));
        let api: ApiError = LlmError::EmptyResponse.into();
        assert!(matches!(api, ApiError::BadGateway(_)));
    }

    #[test]
    fn parses_chat_completion_payload() {
        let payload = r#"{"choices":[{"message":{"role":"assistant","content":"Report body"}}]}"#;
        let parsed: ChatCompletion = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Report body"));
    }
}

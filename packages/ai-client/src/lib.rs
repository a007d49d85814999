//! Minimal LLM REST API client.
//!
//! A clean client for an OpenAI-compatible chat completions API with no
//! domain-specific logic. The content engine wires this behind its
//! `ContentGenerator` trait; this crate only knows how to send a prompt
//! and hand back the model's reply.
//!
//! # Example
//!
//! ```rust,ignore
//! use ai_client::{LlmClient, Message};
//!
//! let client = LlmClient::new(api_key);
//!
//! // Free-form completion
//! let text = client
//!     .complete("gpt-4o-mini", vec![Message::user("Hello!")])
//!     .await?;
//!
//! // JSON-mode completion (structured content generation)
//! let value = client
//!     .complete_json("gpt-4o-mini", "You produce JSON.", "Outline a syllabus.")
//!     .await?;
//! ```

mod error;
mod types;

pub use error::{LlmError, Result};
pub use types::{ChatRequest, ChatResponse, Choice, Message, ResponseFormat, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// HTTP client for an OpenAI-compatible chat completions endpoint.
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    /// Create a client with the default base URL.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create a client from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Override the API base URL (e.g. for a compatible proxy).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Send a chat completion request and return the raw response.
    pub async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{}: {}", status, body)));
        }

        let parsed = response.json::<ChatResponse>().await?;
        Ok(parsed)
    }

    /// Complete a prompt and return the assistant's text content.
    pub async fn complete(&self, model: &str, messages: Vec<Message>) -> Result<String> {
        let response = self
            .chat_completion(ChatRequest {
                model: model.to_string(),
                messages,
                temperature: None,
                max_tokens: None,
                response_format: None,
            })
            .await?;

        extract_content(response)
    }

    /// Complete a prompt in JSON mode and parse the reply as a JSON value.
    pub async fn complete_json(
        &self,
        model: &str,
        system: &str,
        user: &str,
    ) -> Result<serde_json::Value> {
        let response = self
            .chat_completion(ChatRequest {
                model: model.to_string(),
                messages: vec![Message::system(system), Message::user(user)],
                temperature: None,
                max_tokens: None,
                response_format: Some(ResponseFormat::json_object()),
            })
            .await?;

        let content = extract_content(response)?;
        serde_json::from_str(&content)
            .map_err(|e| LlmError::Parse(format!("model reply is not valid JSON: {}", e)))
    }
}

/// Pull the first choice's content out of a response.
fn extract_content(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| LlmError::Parse("response contained no choices".to_string()))
}

//! Language-model upstream: request shape, chat client, retrying caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::error::UpstreamError;
use crate::result::Category;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::ticket::TicketSnapshot;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Fixed sampling parameters biased toward short structured output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 80,
        }
    }
}

/// One chat-completions request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

impl ChatRequest {
    /// System taxonomy instruction plus the ticket's subject and body.
    pub fn for_ticket(model: &str, sampling: SamplingParams, ticket: &TicketSnapshot) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: system_prompt(),
                },
                ChatMessage {
                    role: Role::User,
                    content: user_prompt(ticket),
                },
            ],
            sampling,
        }
    }
}

/// Taxonomy and exact response schema the model must emit.
pub fn system_prompt() -> String {
    let names = Category::ALL.map(Category::as_str).join(", ");
    let rules = Category::ALL
        .iter()
        .map(|c| format!("- {}: {}", c.as_str(), c.rule()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a ticket classification system. Analyze the ticket content and classify it \
         into one of these categories: {names}.\n\n\
         Return ONLY a valid JSON response with these exact keys:\n\
         {{\n  \"category\": \"one of the categories above\",\n  \
         \"explanation\": \"brief explanation why this category was chosen\",\n  \
         \"confidence\": 0.85\n}}\n\n\
         Rules:\n{rules}\n- confidence: decimal between 0.0 and 1.0"
    )
}

pub fn user_prompt(ticket: &TicketSnapshot) -> String {
    format!("Subject: {}\n\nBody: {}", ticket.subject, ticket.body)
}

/// Transport to a language-model API. Returns the assistant's message text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<String, UpstreamError>;
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiChatClient {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, UpstreamError> {
        Self::new(
            config.api_key.clone(),
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn send(&self, request: &ChatRequest) -> Result<String, UpstreamError> {
        let api_key = self.api_key.as_deref().ok_or(UpstreamError::MissingApiKey)?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                // reqwest hides "timed out" behind the source chain.
                if e.is_timeout() {
                    UpstreamError::Transport(format!("timeout: {e}"))
                } else {
                    UpstreamError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Api { status, body });
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        resp_json["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or(UpstreamError::EmptyResponse)
    }
}

/// Wraps a [`ChatClient`] with the transient-only retry policy.
#[derive(Clone)]
pub struct UpstreamCaller {
    client: Arc<dyn ChatClient>,
    policy: RetryPolicy,
}

impl UpstreamCaller {
    pub fn new(client: Arc<dyn ChatClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `request`, retrying transient failures with exponential backoff.
    pub async fn call(&self, request: &ChatRequest) -> Result<String, UpstreamError> {
        let policy = self.policy;
        let client = &self.client;
        retry_with_backoff(
            policy.max_attempts,
            |attempt| policy.delay_before(attempt),
            UpstreamError::is_transient,
            |attempt| {
                debug!(attempt, model = %request.model, "Calling language model");
                async move { client.send(request).await }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mockall::Sequence;

    fn ticket() -> TicketSnapshot {
        TicketSnapshot {
            id: "t-1".into(),
            subject: "Login broken".into(),
            body: "Crashes on submit".into(),
            updated_at: Utc.with_ymd_and_hms(2025, 9, 3, 18, 23, 3).unwrap(),
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::for_ticket("gpt-4o-mini", SamplingParams::default(), &ticket())
    }

    #[test]
    fn test_user_prompt_joins_subject_and_body() {
        assert_eq!(
            user_prompt(&ticket()),
            "Subject: Login broken\n\nBody: Crashes on submit"
        );
    }

    #[test]
    fn test_system_prompt_lists_taxonomy() {
        let prompt = system_prompt();
        for category in Category::ALL {
            assert!(prompt.contains(&format!("- {}: ", category.as_str())));
        }
        assert!(prompt.contains("\"confidence\": 0.85"));
    }

    #[test]
    fn test_request_serializes_flat_sampling() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["max_tokens"], 80);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert!((json["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let mut mock = MockChatClient::new();
        let mut seq = Sequence::new();
        mock.expect_send()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(UpstreamError::Transport("Rate limit reached".into())));
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("{}".into()));

        let caller = UpstreamCaller::new(Arc::new(mock), RetryPolicy::default());
        assert_eq!(caller.call(&request()).await.unwrap(), "{}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_api_key_not_retried() {
        let mut mock = MockChatClient::new();
        mock.expect_send().times(1).returning(|_| {
            Err(UpstreamError::Api {
                status: 401,
                body: "Incorrect API key provided: invalid api key".into(),
            })
        });

        let caller = UpstreamCaller::new(Arc::new(mock), RetryPolicy::default());
        let err = caller.call(&request()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Api { status: 401, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_five_attempts() {
        let mut mock = MockChatClient::new();
        mock.expect_send()
            .times(5)
            .returning(|_| Err(UpstreamError::Api {
                status: 429,
                body: "too many requests".into(),
            }));

        let caller = UpstreamCaller::new(Arc::new(mock), RetryPolicy::default());
        assert!(caller.call(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_openai_client_without_key_fails_fast() {
        let client =
            OpenAiChatClient::new(None, "http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let err = client.send(&request()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::MissingApiKey));
    }
}

//! OpenAI-compatible execution adapter
//!
//! Sends `POST {base_url}/chat/completions` and maps the HTTP outcome onto
//! the routing core's [`ErrorKind`] taxonomy:
//!
//! | Outcome | Kind |
//! |---------|------|
//! | 401, 403 | AuthenticationError |
//! | 404 | ModelNotFound |
//! | 429 | RateLimited |
//! | 400 mentioning the context window | ContextLengthExceeded |
//! | other 400, 422 | InvalidRequest |
//! | 5xx | ServerError |
//! | client-side timeout | Timeout |
//! | anything else | Unknown |

use crate::config::EndpointConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use routing::{ErrorKind, ExecutionAdapter, InvocationResponse, ModelProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const CONTEXT_LENGTH_MARKERS: &[&str] = &[
    "context length",
    "context_length",
    "context window",
    "maximum context",
    "too many tokens",
    "prompt is too long",
];

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

pub struct HttpAdapter {
    http: reqwest::Client,
    endpoint: EndpointConfig,
    api_key: Option<String>,
    /// backend id → model name sent on the wire
    models: HashMap<String, String>,
}

impl HttpAdapter {
    pub fn new(endpoint: EndpointConfig, profiles: &[ModelProfile]) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let api_key = endpoint.api_key();
        if api_key.is_none() {
            warn!(var = %endpoint.api_key_var, "No API key set; requests go out unauthenticated");
        }
        let models = profiles
            .iter()
            .map(|p| (p.backend_id.clone(), p.model_name().to_string()))
            .collect();
        Ok(Self {
            http,
            endpoint,
            api_key,
            models,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ExecutionAdapter for HttpAdapter {
    async fn invoke(&self, backend_id: &str, prompt: &str, timeout: Duration) -> InvocationResponse {
        let model = self
            .models
            .get(backend_id)
            .cloned()
            .unwrap_or_else(|| backend_id.to_string());
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.endpoint.max_tokens,
            temperature: self.endpoint.temperature,
        };

        let mut builder = self
            .http
            .post(self.completions_url())
            .timeout(timeout)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let kind = classify_transport(&e);
                warn!(backend = backend_id, error_kind = %kind, "HTTP request failed: {}", e);
                return InvocationResponse::failed(kind);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = classify_status(status.as_u16(), &body);
            warn!(backend = backend_id, status = status.as_u16(), error_kind = %kind, "Backend returned an error");
            return InvocationResponse::failed(kind);
        }

        let chat: ChatResponse = match response.json().await {
            Ok(chat) => chat,
            Err(e) => {
                warn!(backend = backend_id, "Failed to parse response: {}", e);
                return InvocationResponse::failed(ErrorKind::Unknown);
            }
        };

        let Some(choice) = chat.choices.into_iter().next() else {
            warn!(backend = backend_id, "Response carried no choices");
            return InvocationResponse::failed(ErrorKind::Unknown);
        };

        let text = match (choice.message.reasoning_content, choice.message.content) {
            (Some(reasoning), Some(answer)) => {
                format!("<reasoning>\n{}\n</reasoning>\n\n{}", reasoning, answer)
            }
            (Some(reasoning), None) => reasoning,
            (None, content) => content.unwrap_or_default(),
        };

        debug!(backend = backend_id, chars = text.len(), "Completion received");
        InvocationResponse {
            success: true,
            text: Some(text),
            prompt_tokens: chat.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: chat.usage.as_ref().map(|u| u.completion_tokens),
            error_kind: None,
        }
    }
}

/// Map a non-success HTTP status (and its body) to an error kind.
pub fn classify_status(status: u16, body: &str) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::AuthenticationError,
        404 => ErrorKind::ModelNotFound,
        429 => ErrorKind::RateLimited,
        400 if mentions_context_length(body) => ErrorKind::ContextLengthExceeded,
        400 | 422 => ErrorKind::InvalidRequest,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
    }
}

fn mentions_context_length(body: &str) -> bool {
    let lower = body.to_lowercase();
    CONTEXT_LENGTH_MARKERS.iter().any(|m| lower.contains(m))
}

fn classify_transport(error: &reqwest::Error) -> ErrorKind {
    if error.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Unknown
    }
}

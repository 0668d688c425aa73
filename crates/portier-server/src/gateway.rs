//! Relay to the upstream chat-completion API.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use portier_shared::models;
use portier_shared::protocol::{ChatTurn, CompletionReply, CompletionRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Missing messages")]
    EmptyConversation,

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: StatusCode, message: String },

    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response structure")]
    InvalidResponse,
}

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    model: &'a str,
    max_completion_tokens: u32,
    messages: &'a [ChatTurn],
}

#[derive(Deserialize)]
struct UpstreamResponse {
    #[serde(default)]
    choices: Vec<UpstreamChoice>,
    usage: Option<UpstreamUsage>,
}

#[derive(Deserialize)]
struct UpstreamChoice {
    message: UpstreamMessage,
}

#[derive(Deserialize)]
struct UpstreamMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UpstreamUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Deserialize)]
struct UpstreamErrorBody {
    error: UpstreamErrorDetail,
}

#[derive(Deserialize)]
struct UpstreamErrorDetail {
    message: String,
}

pub struct CompletionGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    organization: Option<String>,
}

impl CompletionGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        organization: Option<String>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            organization,
        })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionReply, GatewayError> {
        if request.messages.is_empty() {
            return Err(GatewayError::EmptyConversation);
        }
        let spec = models::find(&request.model)
            .ok_or_else(|| GatewayError::UnknownModel(request.model.clone()))?;
        let api_key = self.api_key.as_deref().ok_or(GatewayError::MissingApiKey)?;

        let max_tokens = request
            .max_completion_tokens
            .map_or(spec.max_limit, |n| n.min(spec.max_limit));

        let body = UpstreamRequest {
            model: spec.id,
            max_completion_tokens: max_tokens,
            messages: &request.messages,
        };

        let mut builder = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body);
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        debug!(model = spec.id, messages = request.messages.len(), max_tokens, "relaying completion");
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<UpstreamErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or_else(|_| text.trim().to_owned());
            warn!(%status, %message, "upstream completion failed");
            return Err(GatewayError::Upstream { status, message });
        }

        let parsed: UpstreamResponse = response
            .json()
            .await
            .map_err(|_| GatewayError::InvalidResponse)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(GatewayError::InvalidResponse)?;

        Ok(CompletionReply {
            reply: content.trim().to_owned(),
            token_usage: parsed.usage.map_or(0, |u| u.total_tokens),
        })
    }
}

//! HTTP access to a Portier server.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use portier_shared::protocol::{
    AuthResponse, CompletionReply, CompletionRequest, ErrorPayload, IpInfo, PasswordRequest,
};

use crate::backend::{CompletionBackend, ReplyChunk, ReplyStream};
use crate::error::ClientError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Shared connection settings for one server.
#[derive(Debug, Clone)]
pub struct ServerClient {
    http: Client,
    base_url: String,
}

impl ServerClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // -- Authorization --

    /// Current authorization status for this client.
    pub async fn auth_status(&self) -> Result<AuthResponse, ClientError> {
        let resp = self.http.get(self.url("/api/auth")).send().await?;
        auth_body(resp).await
    }

    /// Submit a password, optionally suffixed with unlock minutes.
    pub async fn submit_password(&self, password: &str) -> Result<AuthResponse, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/auth"))
            .json(&PasswordRequest {
                password: password.to_string(),
            })
            .send()
            .await?;
        auth_body(resp).await
    }

    pub async fn client_ip(&self) -> Result<IpInfo, ClientError> {
        let resp = self.http.get(self.url("/api/ip")).send().await?;
        json_body(resp).await
    }

    // -- Completion --

    pub async fn completion(&self, request: &CompletionRequest) -> Result<CompletionReply, ClientError> {
        debug!(model = %request.model, messages = request.messages.len(), "requesting completion");
        let resp = self
            .http
            .post(self.url("/api/completion"))
            .json(request)
            .send()
            .await?;
        json_body(resp).await
    }
}

#[async_trait]
impl CompletionBackend for ServerClient {
    async fn stream(&self, request: CompletionRequest) -> Result<ReplyStream, ClientError> {
        let reply = self.completion(&request).await?;
        let chunks = vec![
            Ok(ReplyChunk::Text(reply.reply)),
            Ok(ReplyChunk::Usage(reply.token_usage)),
        ];
        Ok(stream::iter(chunks).boxed())
    }
}

/// Decode a successful body, or turn the error payload into [`ClientError::Api`].
async fn json_body<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorPayload>(&text) {
        Ok(payload) => payload.error.message,
        Err(_) if text.trim().is_empty() => format!("Server answered {status}"),
        Err(_) => text.trim().to_string(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

/// The auth endpoints answer with an [`AuthResponse`] on every status.
async fn auth_body(resp: Response) -> Result<AuthResponse, ClientError> {
    let status = resp.status();
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|_| ClientError::Api {
        status: status.as_u16(),
        message: if text.trim().is_empty() {
            format!("Server answered {status}")
        } else {
            text.trim().to_string()
        },
    })
}

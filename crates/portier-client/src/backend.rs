//! The seam between the chat session and whatever produces replies.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use portier_shared::protocol::{CompletionReply, CompletionRequest};

use crate::error::ClientError;

/// One piece of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyChunk {
    /// Text to append to the reply.
    Text(String),
    /// Tokens consumed by the request, reported once.
    Usage(u64),
}

pub type ReplyStream = BoxStream<'static, Result<ReplyChunk, ClientError>>;

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Start a completion. The stream ends when the reply is complete.
    async fn stream(&self, request: CompletionRequest) -> Result<ReplyStream, ClientError>;

    /// Run a completion to the end and return the whole reply.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionReply, ClientError> {
        let mut stream = self.stream(request).await?;
        let mut reply = CompletionReply {
            reply: String::new(),
            token_usage: 0,
        };
        while let Some(chunk) = stream.next().await {
            match chunk? {
                ReplyChunk::Text(text) => reply.reply.push_str(&text),
                ReplyChunk::Usage(tokens) => reply.token_usage += tokens,
            }
        }
        Ok(reply)
    }
}

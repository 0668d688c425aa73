use thiserror::Error;

use portier_store::StoreError;

/// Errors produced by the chat client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Local storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The server could not be reached or answered garbage.
    #[error("Could not reach the server: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error payload.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// A completion is already in flight.
    #[error("A reply is already being generated")]
    Busy,

    /// The message is still receiving streamed content.
    #[error("Message {0} is still being written")]
    MessageStreaming(u32),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Request cancelled")]
    Cancelled,
}

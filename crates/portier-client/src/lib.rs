//! # portier-client
//!
//! Chat client for a Portier server. The [`ChatSession`] drives one
//! conversation at a time against any [`CompletionBackend`] and keeps the
//! local history and token total in a `portier-store` database. The
//! [`ServerClient`] is the HTTP backend used by the `portier` binary.

pub mod backend;
pub mod error;
pub mod http;
pub mod pending;
pub mod session;

pub use backend::{CompletionBackend, ReplyChunk, ReplyStream};
pub use error::ClientError;
pub use http::ServerClient;
pub use pending::PendingReply;
pub use session::ChatSession;

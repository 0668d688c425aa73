//! Types and helpers shared by the Portier client, store and server.

pub mod constants;
pub mod models;
pub mod protocol;
pub mod sanitize;
pub mod tokens;
pub mod types;

//! # portier-store
//!
//! Durable client-side storage for Portier, backed by SQLite.
//!
//! The database is used as a small key/value store (one row per well-known
//! key) so the on-disk layout stays human-inspectable with any SQLite shell.
//! On top of it sit the [`ConversationStore`] and the [`TokenLedger`]. Every
//! mutation is committed before the call returns.

pub mod conversations;
pub mod database;
pub mod exchange;
pub mod items;
pub mod ledger;
pub mod migrations;

mod error;

pub use conversations::ConversationStore;
pub use database::Database;
pub use error::{ImportError, StoreError};
pub use ledger::TokenLedger;

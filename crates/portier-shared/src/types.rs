//! Conversation domain model.
//!
//! These structs are the exact shape persisted under [`HISTORY_KEY`] and
//! exchanged through export files, so every field is `camelCase` on the wire.
//!
//! [`HISTORY_KEY`]: crate::constants::HISTORY_KEY

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Message content
// ---------------------------------------------------------------------------

/// Message body as it may appear in storage.
///
/// Older records stored the whole completion reply object instead of the
/// text. Both shapes are accepted and collapsed into a plain string when a
/// [`Message`] is deserialized, so nothing past the storage boundary ever
/// sees the legacy form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredContent {
    Text(String),
    Legacy {
        reply: String,
        #[serde(rename = "tokenUsage", default)]
        #[allow(dead_code)]
        token_usage: Option<u64>,
    },
}

impl From<StoredContent> for String {
    fn from(content: StoredContent) -> Self {
        match content {
            StoredContent::Text(text) => text,
            StoredContent::Legacy { reply, .. } => reply,
        }
    }
}

fn deserialize_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StoredContent::deserialize(deserializer).map(String::from)
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sequence position at creation time, unique within the conversation.
    pub id: u32,
    pub role: Role,
    #[serde(deserialize_with = "deserialize_content")]
    pub content: String,
    /// Upstream model that produced the message. Absent for user messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Message {
    pub fn user(id: u32, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            model: None,
        }
    }

    pub fn assistant(id: u32, content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            model: Some(model.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_message: DateTime<Utc>,
}

impl Conversation {
    /// A fresh, empty conversation. The id is assigned when it is stored.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            messages: Vec::new(),
            created_at: now,
            last_message: now,
        }
    }

    /// Id the next appended message will receive.
    pub fn next_message_id(&self) -> u32 {
        self.messages.last().map(|m| m.id + 1).unwrap_or(0)
    }

    pub fn message(&self, id: u32) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: u32) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// All stored conversations, keyed by conversation id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History(pub BTreeMap<String, Conversation>);

impl History {
    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Conversations ordered newest-created first.
    pub fn by_recent(&self) -> Vec<&Conversation> {
        let mut items: Vec<&Conversation> = self.0.values().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }
}

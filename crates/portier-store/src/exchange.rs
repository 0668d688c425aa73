//! Conversation export and import.
//!
//! Exports come in two shapes: a role-prefixed plain-text transcript for
//! reading, and a JSON document that [`parse_import`] accepts back.
//!
//! Imported files are untrusted. They are size-checked, structurally
//! validated against a raw [`serde_json::Value`] (so a bad document is
//! rejected as a whole instead of half-applied), and every string that ends
//! up in the store is truncated and HTML-escaped.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use portier_shared::constants::{MAX_CONTENT_CHARS, MAX_IMPORT_CHARS, MAX_NAME_CHARS};
use portier_shared::models;
use portier_shared::sanitize;
use portier_shared::types::{Conversation, Message, Role};

use crate::error::{ImportError, Result};

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// JSON document suitable for re-import.
pub fn export_json(conversation: &Conversation) -> Result<String> {
    Ok(serde_json::to_string_pretty(conversation)?)
}

/// Human-readable transcript, one role-prefixed block per message.
pub fn export_transcript(conversation: &Conversation) -> String {
    let mut out = format!("# {}\n\n", conversation.name);
    for message in &conversation.messages {
        match &message.model {
            Some(model) => out.push_str(&format!("{} ({model}): ", message.role)),
            None => out.push_str(&format!("{}: ", message.role)),
        }
        out.push_str(&message.content);
        out.push_str("\n\n");
    }
    out
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Validate and sanitize an exported conversation.
///
/// The returned conversation has an empty id; message ids are reassigned
/// `0..n` by position and unknown `model` values are dropped.
pub fn parse_import(raw: &str, now: DateTime<Utc>) -> std::result::Result<Conversation, ImportError> {
    if raw.len() > MAX_IMPORT_CHARS {
        let size = raw.chars().count();
        if size > MAX_IMPORT_CHARS {
            return Err(ImportError::TooLarge {
                size,
                max: MAX_IMPORT_CHARS,
            });
        }
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|e| ImportError::Malformed(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| structure("top level must be an object"))?;

    let name = object
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| structure("`name` must be a string"))?;

    let raw_messages = object
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| structure("`messages` must be an array"))?;

    let mut messages = Vec::with_capacity(raw_messages.len());
    for (index, raw_message) in raw_messages.iter().enumerate() {
        let fields = raw_message
            .as_object()
            .ok_or_else(|| structure(format!("message {index} is not an object")))?;
        messages.push(import_message(index, fields)?);
    }

    Ok(Conversation {
        id: String::new(),
        name: sanitize::clean(name, MAX_NAME_CHARS),
        messages,
        created_at: now,
        last_message: now,
    })
}

fn import_message(
    index: usize,
    fields: &Map<String, Value>,
) -> std::result::Result<Message, ImportError> {
    let role = fields
        .get("role")
        .and_then(Value::as_str)
        .and_then(Role::parse)
        .ok_or_else(|| structure(format!("message {index} has an invalid role")))?;

    let content = match fields.get("content") {
        Some(Value::String(text)) => text.as_str(),
        // Legacy shape: the whole completion reply object.
        Some(Value::Object(legacy)) => legacy
            .get("reply")
            .and_then(Value::as_str)
            .ok_or_else(|| structure(format!("message {index} has no string `reply`")))?,
        _ => return Err(structure(format!("message {index} has invalid content"))),
    };

    let model = fields
        .get("model")
        .and_then(Value::as_str)
        .filter(|id| models::is_known(id))
        .map(str::to_owned);

    let id = u32::try_from(index).map_err(|_| structure("too many messages"))?;

    Ok(Message {
        id,
        role,
        content: sanitize::clean(content, MAX_CONTENT_CHARS),
        model,
    })
}

fn structure(reason: impl Into<String>) -> ImportError {
    ImportError::Structure(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn import(value: Value) -> std::result::Result<Conversation, ImportError> {
        parse_import(&value.to_string(), Utc::now())
    }

    #[test]
    fn escapes_markup() {
        let conversation = import(json!({
            "name": "T",
            "messages": [{ "role": "user", "content": "<script>" }]
        }))
        .unwrap();
        assert_eq!(conversation.messages[0].content, "&lt;script&gt;");
    }

    #[test]
    fn normalizes_legacy_content_and_reassigns_ids() {
        let conversation = import(json!({
            "name": "Legacy",
            "messages": [
                { "id": 41, "role": "user", "content": "question" },
                { "id": 7, "role": "assistant", "content": { "reply": "answer", "tokenUsage": 3 } }
            ]
        }))
        .unwrap();

        let ids: Vec<u32> = conversation.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, [0, 1]);
        assert_eq!(conversation.messages[1].content, "answer");
    }

    #[test]
    fn keeps_only_known_models() {
        let conversation = import(json!({
            "name": "M",
            "messages": [
                { "role": "assistant", "content": "a", "model": "gpt-4o-mini" },
                { "role": "assistant", "content": "b", "model": "<img src=x>" }
            ]
        }))
        .unwrap();
        assert_eq!(conversation.messages[0].model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(conversation.messages[1].model, None);
    }

    #[test]
    fn truncates_long_fields() {
        let conversation = import(json!({
            "name": "n".repeat(500),
            "messages": [{ "role": "user", "content": "c".repeat(20_000) }]
        }))
        .unwrap();
        assert_eq!(conversation.name.chars().count(), MAX_NAME_CHARS);
        assert_eq!(conversation.messages[0].content.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn rejects_bad_structure() {
        for bad in [
            json!([]),
            json!({ "messages": [] }),
            json!({ "name": 3, "messages": [] }),
            json!({ "name": "x", "messages": {} }),
            json!({ "name": "x", "messages": [{ "role": "system", "content": "hi" }] }),
            json!({ "name": "x", "messages": [{ "role": "user", "content": 12 }] }),
            json!({ "name": "x", "messages": [{ "role": "user", "content": { "text": "hi" } }] }),
            json!({ "name": "x", "messages": ["hi"] }),
        ] {
            assert!(
                matches!(import(bad.clone()), Err(ImportError::Structure(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            parse_import("{not json", Utc::now()),
            Err(ImportError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_oversized_document() {
        let raw = json!({
            "name": "big",
            "messages": [{ "role": "user", "content": "x".repeat(MAX_IMPORT_CHARS) }]
        })
        .to_string();
        assert!(matches!(
            parse_import(&raw, Utc::now()),
            Err(ImportError::TooLarge { .. })
        ));
    }

    #[test]
    fn export_reimports() {
        let now = Utc::now();
        let mut conversation = Conversation::new("Trip", now);
        conversation.messages.push(Message::user(0, "Where to?"));
        conversation
            .messages
            .push(Message::assistant(1, "Zurich", "gpt-4o-mini"));

        let json = export_json(&conversation).unwrap();
        let back = parse_import(&json, now).unwrap();
        assert_eq!(back.name, "Trip");
        assert_eq!(back.messages, conversation.messages);

        let transcript = export_transcript(&conversation);
        assert!(transcript.contains("user: Where to?"));
        assert!(transcript.contains("assistant (gpt-4o-mini): Zurich"));
    }
}

//! JSON bodies exchanged between the client and the server.

use serde::{Deserialize, Serialize};

use crate::types::{Message, Role};

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReply {
    pub reply: String,
    pub token_usage: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Body of every non-2xx response from the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: ErrorBody,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    /// Which policy produced the decision, e.g. `unlocked-by-timer`.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpInfo {
    pub ip: String,
    pub is_ip_allowed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_request_wire_shape() {
        let request = CompletionRequest {
            model: "gpt-4o-mini".into(),
            max_completion_tokens: Some(100),
            messages: vec![ChatTurn {
                role: Role::User,
                content: "hi".into(),
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4o-mini",
                "max_completion_tokens": 100,
                "messages": [{ "role": "user", "content": "hi" }]
            })
        );
    }

    #[test]
    fn reply_and_ip_info_are_camel_case() {
        let reply = serde_json::to_value(CompletionReply {
            reply: "ok".into(),
            token_usage: 7,
        })
        .unwrap();
        assert_eq!(reply["tokenUsage"], 7);

        let info = serde_json::to_value(IpInfo {
            ip: "1.2.3.4".into(),
            is_ip_allowed: true,
        })
        .unwrap();
        assert_eq!(info["isIpAllowed"], true);
    }
}

//! Catalog of upstream chat models the service accepts.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub id: &'static str,
    pub name: &'static str,
    /// Upper bound for `max_completion_tokens`.
    pub max_limit: u32,
}

pub const CHAT_MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "gpt-4o-mini",
        name: "gpt-4o-mini",
        max_limit: 16_384,
    },
    ModelSpec {
        id: "chatgpt-4o-latest",
        name: "chatgpt-4o-latest",
        max_limit: 16_384,
    },
    ModelSpec {
        id: "o1-mini-2024-09-12",
        name: "o1-mini-2024-09-12",
        max_limit: 65_536,
    },
    ModelSpec {
        id: "o1-preview-2024-09-12",
        name: "o1-preview-2024-09-12",
        max_limit: 32_768,
    },
];

pub const DEFAULT_MODEL: &str = "chatgpt-4o-latest";

pub fn find(id: &str) -> Option<&'static ModelSpec> {
    CHAT_MODELS.iter().find(|m| m.id == id)
}

pub fn is_known(id: &str) -> bool {
    find(id).is_some()
}

pub fn default_model() -> &'static ModelSpec {
    find(DEFAULT_MODEL).unwrap_or(&CHAT_MODELS[0])
}

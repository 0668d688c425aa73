/// Application name
pub const APP_NAME: &str = "Portier";

/// Storage key holding the serialized conversation history
pub const HISTORY_KEY: &str = "history";

/// Storage key holding the cumulative token total
pub const TOTAL_TOKENS_KEY: &str = "totalTokens";

/// Maximum size of an imported conversation document, in characters
pub const MAX_IMPORT_CHARS: usize = 1_000_000;

/// Maximum length of an imported conversation name, in characters
pub const MAX_NAME_CHARS: usize = 100;

/// Maximum length of an imported message body, in characters
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Name shown while a title is being generated
pub const PLACEHOLDER_NAME: &str = "...";

/// Name used when title generation fails
pub const FALLBACK_NAME: &str = "New Conversation";

/// Model used for title generation
pub const TITLE_MODEL: &str = "gpt-4o-mini";

/// Completion budget for title generation
pub const TITLE_MAX_TOKENS: u32 = 100;

/// Failed password attempts before an IP is locked out
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// Duration of a per-IP lockout, in minutes
pub const LOCKOUT_MINUTES: u32 = 15;

/// Unlock window granted to an allow-listed IP inside an access window, in minutes
pub const IP_WINDOW_UNLOCK_MINUTES: u32 = 30;

/// Longest unlock window a password may request, in minutes
pub const MAX_UNLOCK_MINUTES: u32 = 24 * 60;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 3000;

//! Cumulative token usage, persisted under [`TOTAL_TOKENS_KEY`].

use tracing::debug;

use portier_shared::constants::TOTAL_TOKENS_KEY;
use portier_shared::tokens;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Monotonic token counter. There is deliberately no reset.
pub struct TokenLedger<'db> {
    db: &'db Database,
}

impl<'db> TokenLedger<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    pub fn current(&self) -> Result<u64> {
        match self.db.get_item(TOTAL_TOKENS_KEY)? {
            None => Ok(0),
            Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                StoreError::Corrupt {
                    key: TOTAL_TOKENS_KEY.to_owned(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    /// Add `usage` and return the new total.
    pub fn add(&self, usage: u64) -> Result<u64> {
        let total = self.current()?.saturating_add(usage);
        self.db.set_item(TOTAL_TOKENS_KEY, &total.to_string())?;
        debug!(usage, total, "token usage recorded");
        Ok(total)
    }

    /// Pre-response estimate for `text`; see [`tokens::estimate`].
    pub fn estimate(text: &str) -> u64 {
        tokens::estimate(text)
    }
}

use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be decoded.
    #[error("Corrupt value under key `{key}`: {reason}")]
    Corrupt { key: String, reason: String },

    /// Serialization of a value failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// An imported document was rejected. The store is unchanged.
    #[error("Import rejected: {0}")]
    Import(#[from] ImportError),
}

/// Reasons an imported conversation document is refused.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("document is {size} characters, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("document is not valid JSON: {0}")]
    Malformed(String),

    #[error("invalid structure: {0}")]
    Structure(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

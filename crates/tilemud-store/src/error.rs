//! Error types for the store layer.

/// Errors produced by the KV and durable store seams.
///
/// These are infrastructure failures; whether they surface to a client
/// (and how) is decided by the services wrapping the stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key-value store could not be reached or failed an operation.
    #[error("kv store failure: {0}")]
    Kv(String),

    /// The durable store could not be reached or failed an operation.
    #[error("durable store failure: {0}")]
    Durable(String),

    /// A stored record failed to parse.
    #[error("corrupt record at {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

impl StoreError {
    /// Wraps a serde failure while reading `key`.
    pub fn corrupt(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            key: key.into(),
            detail: err.to_string(),
        }
    }
}

/// Failures of a [`KeyValueStore`](crate::state::KeyValueStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key holds a value of the other kind (string vs. string set)
    #[error("value stored under `{key}` is not a {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("failed to encode value for `{key}`: {source}")]
    Encoding {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The background writer task is gone
    #[error("store writer has shut down")]
    Closed,
}

/// Failures of a [`ResolutionService`](crate::resolver::ResolutionService) call.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("resolution request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("resolution service returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid resolver endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("resolution service unavailable: {0}")]
    Unavailable(String),
}

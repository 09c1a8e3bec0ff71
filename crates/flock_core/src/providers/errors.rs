/// Errors raised by the HTTP layer underneath the adapters. Adapters never hand these to their
/// callers; they log them and report the lookup as not found.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection, TLS, timeout or body read failure, originating from `reqwest`
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Error encountered while serializing a request body
    #[error("failed to serialize request body: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Failure to construct the HTTP client itself
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

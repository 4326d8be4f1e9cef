use thiserror::Error;

/// Network-level failure raised by a [`Transport`](crate::transport::Transport).
///
/// HTTP error statuses are not transport failures; they come back as a
/// regular [`TransportResponse`](crate::transport::TransportResponse).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP request to {url} timed out")]
    Timeout { url: String },

    #[error("Failed to read response body from {url}: {message}")]
    Body { url: String, message: String },
}

/// FCM Client Error Types
#[derive(Error, Debug)]
pub enum FCMError {
    /// Malformed private key or RSA signing failure. Never retried.
    #[error("Failed to sign authorization assertion: {0}")]
    Signing(String),

    /// Token endpoint answered with something other than a usable 200.
    #[error("Token request failed with status {status}: {body}")]
    TokenAcquisition { status: u16, body: String },

    /// Topic batchAdd/batchRemove answered with a non-200 status.
    #[error("Topic subscription request failed with status {status}: {body}")]
    Subscription { status: u16, body: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("No API key or access token configured")]
    MissingCredentials,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to serialize request body: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Error types for the Hibiki client.

use hibiki_server::domain::AuthErrorKind;
use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the credential and it must not be retried
    #[error("Authentication failed: {0}")]
    AuthFailed(AuthErrorKind),

    /// No credential could be obtained from the provider
    #[error("Credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// A frame could not be encoded
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

//! Error taxonomy for authentication attempts, plus the JSON result envelope.

use serde::{Deserialize, Serialize};

use super::tokens::TokenSet;

/// Everything that can terminate one authentication attempt.
///
/// All of these surface as a terminal outcome; nothing inside an attempt
/// propagates as a panic past the orchestrator boundary.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("username and/or password not provided")]
    MissingCredentials,

    #[error("missing configuration value: {0}")]
    MissingConfiguration(&'static str),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("identity provider error {code}: {description}")]
    IdpError { code: String, description: String },

    #[error("redirect URL carries no fragment")]
    NoFragment,

    #[error("redirect fragment carries no access_token")]
    NoAccessToken,

    #[error("unexpected redirect: expected {expected}, landed on {actual}")]
    UnexpectedRedirect { expected: String, actual: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code for the result envelope. For IdP errors
    /// the provider's own error code is reported verbatim instead.
    pub fn code(&self) -> &str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::MissingConfiguration(_) => "missing_configuration",
            AuthError::Configuration(_) => "configuration",
            AuthError::ElementNotFound(_) => "element_not_found",
            AuthError::Timeout(_) => "timeout",
            AuthError::IdpError { code, .. } => code,
            AuthError::NoFragment => "no_fragment",
            AuthError::NoAccessToken => "no_access_token",
            AuthError::UnexpectedRedirect { .. } => "unexpected_redirect",
            AuthError::Internal(_) => "internal",
        }
    }

    /// Wrap an arbitrary error from a collaborator (browser, channel, IO).
    pub fn internal(err: impl std::fmt::Display) -> Self {
        AuthError::Internal(err.to_string())
    }
}

/// Wire shape handed to the outermost caller: either a populated token set or
/// an error code plus description. Also the trailing-JSON contract of an
/// external automation subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<Result<TokenSet, AuthError>> for AuthResult {
    fn from(outcome: Result<TokenSet, AuthError>) -> Self {
        match outcome {
            Ok(tokens) => AuthResult {
                success: true,
                tokens: Some(tokens),
                error: None,
                error_description: None,
            },
            Err(err) => AuthResult {
                success: false,
                tokens: None,
                error: Some(err.code().to_string()),
                error_description: Some(err.to_string()),
            },
        }
    }
}

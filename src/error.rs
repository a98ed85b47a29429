/// Error types for einlass OAuth operations
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("OAuth configuration is missing")]
    MissingConfiguration,

    #[error("Invalid OAuth configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to generate PKCE code verifier or state")]
    PkceGenerationFailed,

    #[error("Authentication session failed: {0}")]
    AuthorizationSessionFailed(String),

    #[error("Received an invalid callback URL")]
    InvalidCallbackUrl,

    #[error("Authorization denied: {error}, description: {description:?}")]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("OAuth state parameter did not match")]
    StateMismatch,

    #[error("Authorization code not found in callback URL")]
    AuthorizationCodeMissing,

    #[error("A sign-in attempt is already in progress")]
    SignInInProgress,

    #[error("Token exchange failed with status code {status}")]
    TokenExchangeFailed { status: u16, body: String },

    #[error("Failed to decode token response: {0}")]
    DecodingFailed(String),

    #[error("No valid refresh token available, sign in again")]
    NoValidRefreshToken,

    #[error("Token refresh failed with status code {status}")]
    TokenRefreshFailed { status: u16 },

    #[error("Refresh token rejected with status code {status}")]
    RefreshTokenInvalid { status: u16 },

    #[error("Token revocation failed with status code {status}")]
    TokenRevocationFailed { status: u16 },

    #[error("Secure store error: {0}")]
    SecureStore(String),

    #[error("API request failed: {0}")]
    ApiRequestFailed(String),

    #[error("HTTP request failed: {0}")]
    Http(#[source] Arc<reqwest::Error>),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Http(Arc::new(err))
    }
}

impl AuthError {
    /// Whether the user has to go through the interactive sign-in again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::NoValidRefreshToken | AuthError::RefreshTokenInvalid { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

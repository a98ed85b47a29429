//! Einlass - OAuth 2.0 with PKCE for installed applications
//!
//! This library signs a user in through an external browser surface using
//! the authorization code flow with PKCE, keeps the resulting tokens in a
//! secure store and hands out valid access tokens, refreshing them when
//! they are about to expire.
//!
//! # Features
//!
//! - OAuth 2.0 authorization code flow with PKCE (RFC 7636), public clients only
//! - Single in-flight token refresh shared by concurrent callers
//! - Token revocation on sign-out (RFC 7009)
//! - Pluggable credential storage: OS keyring, file or memory
//! - Loopback redirect listener for desktop and CLI applications
//!
//! # Example
//!
//! ```no_run
//! use einlass::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> einlass::error::Result<()> {
//! let surface = LoopbackAuthenticator::bind("http://127.0.0.1:8080/callback")?;
//! let config = OAuthConfig::new(
//!     "your-client-id",
//!     surface.redirect_uri(),
//!     &["read", "write"],
//!     "https://auth.example.com/authorize",
//!     "https://auth.example.com/token",
//!     "https://auth.example.com/revoke",
//! );
//!
//! let session = SessionManager::builder(Arc::new(surface))
//!     .config(config)
//!     .build()?;
//!
//! if !session.is_authenticated() {
//!     session.sign_in().await?;
//! }
//! let token = session.get_access_token().await?;
//! println!("Access token: {}", token);
//! # Ok(())
//! # }
//! ```

pub mod authorize;
pub mod callback;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod pkce;
pub mod session;
pub mod store;
pub mod token;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::callback::LoopbackAuthenticator;
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{OAuthConfig, SessionSettings};
    pub use crate::coordinator::{AuthorizationRequest, Completion, SurfaceError, WebAuthenticator};
    pub use crate::error::AuthError;
    pub use crate::pkce::Pkce;
    pub use crate::session::{AuthState, SessionManager, SignInOutcome};
    pub use crate::store::{CredentialStore, FileStore, KeyringStore, MemoryStore, TokenStore};
    pub use crate::token::TokenRecord;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use crate::authorize::{build_authorization_url, parse_callback};
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_authorization_round_trip() {
        let config = OAuthConfig::new(
            "test-client",
            "com.example.app:/oauth2redirect",
            &["read", "write"],
            "https://auth.example.com/authorize",
            "https://auth.example.com/token",
            "https://auth.example.com/revoke",
        );
        let pkce = Pkce::generate().unwrap();
        let state = crate::pkce::generate_state(32).unwrap();

        let url = build_authorization_url(&config, pkce.code_challenge(), &state).unwrap();
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["code_challenge"], pkce.code_challenge());
        assert_eq!(query["scope"], "read write");

        let redirect = format!("com.example.app:/oauth2redirect?code=abc&state={}", state);
        let code = parse_callback(&redirect, &state).unwrap();
        assert_eq!(code.code, "abc");

        // Tokens persisted by one manager are visible to the next.
        let backend = MemoryStore::new();
        let store = TokenStore::new(Arc::new(backend.clone()), "einlass", "oauth-tokens");
        store
            .save(&TokenRecord {
                access_token: "AT1".to_string(),
                refresh_token: Some("RT1".to_string()),
                expires_in: 3600,
                scope: config.scope.clone(),
                token_type: "Bearer".to_string(),
                id_token: None,
                issued_at: 0,
            })
            .unwrap();

        let session = SessionManager::builder(Arc::new(LoopbackAuthenticator::ephemeral().unwrap()))
            .config(config)
            .credential_store(Arc::new(backend))
            .clock(Arc::new(ManualClock::new(10)))
            .build()
            .unwrap();
        assert_eq!(session.state(), AuthState::SignedIn);
    }
}

/// OAuth client configuration and session tuning
use crate::error::{AuthError, Result};
use std::time::Duration;
use url::Url;

/// OAuth 2.0 configuration for a public client
///
/// Carries no client secret. Installed applications rely on PKCE instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    /// Space-delimited scope string
    pub scope: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: String,
}

impl OAuthConfig {
    /// Create a configuration, joining `scopes` with spaces
    pub fn new<S: AsRef<str>>(
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: &[S],
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        revocation_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: join_scopes(scopes),
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            revocation_endpoint: revocation_endpoint.into(),
        }
    }

    /// Google preset for installed applications
    ///
    /// ```
    /// use einlass::config::OAuthConfig;
    ///
    /// let config = OAuthConfig::google(
    ///     "client.apps.googleusercontent.com",
    ///     "com.example.app:/oauth2redirect",
    ///     &["openid", "email"],
    /// );
    /// assert_eq!(config.scope, "openid email");
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn google<S: AsRef<str>>(
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: &[S],
    ) -> Self {
        Self::new(
            client_id,
            redirect_uri,
            scopes,
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "https://oauth2.googleapis.com/revoke",
        )
    }

    /// Check that the client id is present and every URL parses
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "client_id must not be empty".into(),
            ));
        }

        for (name, value) in [
            ("redirect_uri", &self.redirect_uri),
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("revocation_endpoint", &self.revocation_endpoint),
        ] {
            Url::parse(value).map_err(|e| {
                AuthError::InvalidConfiguration(format!("{} is not a valid URL: {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Scheme of the redirect URI, handed to the interactive surface so it
    /// knows which navigation ends the flow
    pub fn redirect_scheme(&self) -> Option<String> {
        Url::parse(&self.redirect_uri)
            .ok()
            .map(|url| url.scheme().to_string())
    }
}

fn join_scopes<S: AsRef<str>>(scopes: &[S]) -> String {
    scopes
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tuning knobs for a [`crate::session::SessionManager`]
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Access tokens are refreshed this many seconds before they expire
    pub expiry_buffer_secs: u64,
    /// Timeout applied to every token endpoint and API request
    pub http_timeout: Duration,
    /// Random bytes in the CSRF `state` value
    pub state_bytes: usize,
    /// Credential store service name
    pub store_service: String,
    /// Credential store account name
    pub store_account: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            expiry_buffer_secs: 60,
            http_timeout: Duration::from_secs(30),
            state_bytes: 32,
            store_service: "einlass".to_string(),
            store_account: "oauth-tokens".to_string(),
        }
    }
}

impl SessionSettings {
    /// Use a per-application credential identity
    pub fn for_app(app_name: &str) -> Self {
        Self {
            store_service: format!("einlass-{}", app_name),
            ..Self::default()
        }
    }
}

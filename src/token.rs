/// Token data and expiry arithmetic
use serde::{Deserialize, Serialize};

/// Tokens issued by the authorization server, as persisted in the secure store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds, as reported by the server
    pub expires_in: u64,
    /// Scopes actually granted (space-delimited)
    pub scope: String,
    pub token_type: String,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Unix timestamp at which the server issued the token
    pub issued_at: u64,
}

impl TokenRecord {
    /// Build a record from a token endpoint response received at `now`.
    ///
    /// `requested_scope` is recorded when the server omits `scope`, which
    /// RFC 6749 allows when the grant matches the request.
    pub fn from_response(response: TokenResponse, now: u64, requested_scope: &str) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
            scope: response
                .scope
                .unwrap_or_else(|| requested_scope.to_string()),
            token_type: response.token_type,
            id_token: response.id_token,
            issued_at: now,
        }
    }

    /// Merge a refresh response into this record.
    ///
    /// Servers do not always rotate the refresh token, so the previous
    /// refresh token, scope and identity token are kept when absent.
    pub fn renewed(&self, response: TokenResponse, now: u64) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or_else(|| self.refresh_token.clone()),
            expires_in: response.expires_in,
            scope: response.scope.unwrap_or_else(|| self.scope.clone()),
            token_type: response.token_type,
            id_token: response.id_token.or_else(|| self.id_token.clone()),
            issued_at: now,
        }
    }

    /// Unix timestamp at which the access token expires
    pub fn expires_at(&self) -> u64 {
        self.issued_at.saturating_add(self.expires_in)
    }

    /// Check if the access token is expired
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at()
    }

    /// Whether the access token may still be handed out, keeping a safety
    /// buffer before the real expiry.
    pub fn is_fresh(&self, now: u64, buffer_secs: u64) -> bool {
        now < self.expires_at().saturating_sub(buffer_secs)
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// A record is worth restoring while it is unexpired or renewable.
    pub fn is_usable(&self, now: u64) -> bool {
        !self.is_expired(now) || self.can_refresh()
    }

    /// The token to hand to the revocation endpoint.
    ///
    /// Revoking the refresh token invalidates the whole grant.
    pub fn revocation_token(&self) -> &str {
        self.refresh_token.as_deref().unwrap_or(&self.access_token)
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Successful token endpoint response body (RFC 6749 section 5.1)
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
    pub token_type: String,
    #[serde(default)]
    pub id_token: Option<String>,
}

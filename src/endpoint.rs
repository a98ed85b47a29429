/// Token endpoint clients: code exchange, refresh and revocation
use crate::clock::Clock;
use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};
use crate::token::{TokenRecord, TokenResponse};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// HTTP client for the provider's token and revocation endpoints
///
/// Public client only: no request ever carries a client secret.
#[derive(Clone)]
pub struct TokenEndpointClient {
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl TokenEndpointClient {
    /// Create a client whose requests time out after `timeout`
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http_client(http, clock))
    }

    pub fn with_http_client(http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        Self { http, clock }
    }

    /// Underlying HTTP client, shared with authenticated API requests
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange an authorization code and its PKCE verifier for tokens
    pub async fn exchange(
        &self,
        code: &str,
        code_verifier: &str,
        config: &OAuthConfig,
    ) -> Result<TokenRecord> {
        tracing::debug!(endpoint = %config.token_endpoint, "exchanging authorization code");

        let response = self
            .http
            .post(&config.token_endpoint)
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("code", code),
                ("code_verifier", code_verifier),
                ("grant_type", "authorization_code"),
                ("redirect_uri", config.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "token exchange rejected");
            return Err(AuthError::TokenExchangeFailed {
                status: status.as_u16(),
                body,
            });
        }

        let token = decode(&body)?;
        Ok(TokenRecord::from_response(
            token,
            self.clock.now(),
            &config.scope,
        ))
    }

    /// Trade the refresh token held by `previous` for a renewed record
    ///
    /// HTTP 400/401 mean the refresh token itself is dead and yield
    /// [`AuthError::RefreshTokenInvalid`]; any other failure status is the
    /// transient [`AuthError::TokenRefreshFailed`].
    pub async fn refresh(&self, previous: &TokenRecord, config: &OAuthConfig) -> Result<TokenRecord> {
        let refresh_token = previous
            .refresh_token
            .as_deref()
            .ok_or(AuthError::NoValidRefreshToken)?;

        tracing::debug!(endpoint = %config.token_endpoint, "refreshing access token");

        let response = self
            .http
            .post(&config.token_endpoint)
            .form(&[
                ("client_id", config.client_id.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match status {
            s if s.is_success() => {
                let token = decode(&body)?;
                Ok(previous.renewed(token, self.clock.now()))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                tracing::warn!(status = status.as_u16(), "refresh token rejected");
                Err(AuthError::RefreshTokenInvalid {
                    status: status.as_u16(),
                })
            }
            _ => {
                tracing::warn!(status = status.as_u16(), "token refresh failed");
                Err(AuthError::TokenRefreshFailed {
                    status: status.as_u16(),
                })
            }
        }
    }

    /// Ask the provider to invalidate `token`
    ///
    /// 400 usually means the token was already invalid, which is as good as
    /// revoked.
    pub async fn revoke(&self, token: &str, config: &OAuthConfig) -> Result<()> {
        tracing::debug!(endpoint = %config.revocation_endpoint, "revoking token");

        let response = self
            .http
            .post(&config.revocation_endpoint)
            .form(&[("token", token)])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::BAD_REQUEST => Ok(()),
            status => Err(AuthError::TokenRevocationFailed {
                status: status.as_u16(),
            }),
        }
    }
}

fn decode(body: &str) -> Result<TokenResponse> {
    serde_json::from_str(body).map_err(|e| AuthError::DecodingFailed(e.to_string()))
}

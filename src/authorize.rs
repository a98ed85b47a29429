/// Authorization request construction and redirect callback validation
use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};
use crate::pkce::Pkce;
use std::collections::HashMap;
use url::Url;

/// Authorization code returned on the redirect callback
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: String,
}

impl std::fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("code", &"<redacted>")
            .field("state", &self.state)
            .finish()
    }
}

/// Build the authorization endpoint URL for one sign-in attempt
pub fn build_authorization_url(
    config: &OAuthConfig,
    code_challenge: &str,
    state: &str,
) -> Result<Url> {
    let mut url = Url::parse(&config.authorization_endpoint).map_err(|e| {
        AuthError::InvalidConfiguration(format!("authorization_endpoint is not a valid URL: {}", e))
    })?;

    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("scope", &config.scope)
        .append_pair("response_type", "code")
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", Pkce::code_challenge_method());

    Ok(url)
}

/// Validate a redirect callback and extract the authorization code.
///
/// Checks run in order: provider `error`, `state` equality, then `code`.
/// Nothing from a callback whose state does not match is trusted.
pub fn parse_callback(redirect_url: &str, expected_state: &str) -> Result<AuthorizationCode> {
    let url = Url::parse(redirect_url).map_err(|_| AuthError::InvalidCallbackUrl)?;
    if url.query().is_none() {
        return Err(AuthError::InvalidCallbackUrl);
    }

    let params = query_params(&url);

    if let Some(error) = params.get("error") {
        return Err(AuthError::AuthorizationDenied {
            error: error.clone(),
            description: params.get("error_description").cloned(),
        });
    }

    let state = params.get("state").ok_or(AuthError::StateMismatch)?;
    if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
        return Err(AuthError::StateMismatch);
    }

    let code = params
        .get("code")
        .filter(|code| !code.is_empty())
        .ok_or(AuthError::AuthorizationCodeMissing)?;

    Ok(AuthorizationCode {
        code: code.clone(),
        state: state.clone(),
    })
}

/// First value of each query parameter
fn query_params(url: &Url) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in url.query_pairs() {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

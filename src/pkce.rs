/// PKCE (Proof Key for Code Exchange) implementation
/// RFC 7636: https://tools.ietf.org/html/rfc7636
use crate::error::{AuthError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes behind a code verifier.
///
/// 96 bytes encode to exactly 128 base64url characters, the upper bound
/// RFC 7636 allows for a verifier.
pub const VERIFIER_BYTES: usize = 96;

/// Fill `len` bytes from the OS random source and encode them base64url
/// without padding.
///
/// Used for both the PKCE verifier and the CSRF `state` value.
pub fn generate_state(len: usize) -> Result<String> {
    let mut buffer = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buffer)
        .map_err(|_| AuthError::PkceGenerationFailed)?;
    Ok(URL_SAFE_NO_PAD.encode(buffer))
}

/// Generate a fresh code verifier
pub fn generate_verifier() -> Result<String> {
    generate_state(VERIFIER_BYTES)
}

/// Derive the S256 code challenge: `base64url(SHA256(verifier))`
pub fn challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// PKCE challenge pair containing code verifier and code challenge
#[derive(Clone)]
pub struct Pkce {
    code_verifier: String,
    code_challenge: String,
}

impl Pkce {
    /// Generate a new PKCE challenge pair
    ///
    /// # Examples
    ///
    /// ```
    /// use einlass::pkce::Pkce;
    ///
    /// let pkce = Pkce::generate().unwrap();
    /// assert_eq!(pkce.code_verifier().len(), 128);
    /// assert_eq!(Pkce::code_challenge_method(), "S256");
    /// ```
    pub fn generate() -> Result<Self> {
        let code_verifier = generate_verifier()?;
        let code_challenge = challenge(&code_verifier);

        Ok(Self {
            code_verifier,
            code_challenge,
        })
    }

    /// Get the code verifier
    pub fn code_verifier(&self) -> &str {
        &self.code_verifier
    }

    /// Get the code challenge
    pub fn code_challenge(&self) -> &str {
        &self.code_challenge
    }

    /// Get the code challenge method (always S256)
    pub fn code_challenge_method() -> &'static str {
        "S256"
    }

    pub(crate) fn into_verifier(self) -> String {
        self.code_verifier
    }
}

impl std::fmt::Debug for Pkce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pkce")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_url_safe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_pkce_generation() {
        let pkce = Pkce::generate().unwrap();

        assert!((43..=128).contains(&pkce.code_verifier().len()));
        assert!(is_url_safe(pkce.code_verifier()));
        assert!(!pkce.code_verifier().contains('='));

        // SHA-256 digest is 32 bytes = 43 chars without padding
        assert_eq!(pkce.code_challenge().len(), 43);
        assert!(is_url_safe(pkce.code_challenge()));
        assert_ne!(pkce.code_verifier(), pkce.code_challenge());
    }

    #[test]
    fn test_pkce_generates_different_values() {
        let pkce1 = Pkce::generate().unwrap();
        let pkce2 = Pkce::generate().unwrap();

        assert_ne!(pkce1.code_verifier(), pkce2.code_verifier());
        assert_ne!(pkce1.code_challenge(), pkce2.code_challenge());
    }

    #[test]
    fn test_challenge_is_deterministic() {
        let verifier = generate_verifier().unwrap();
        assert_eq!(challenge(&verifier), challenge(&verifier));
    }

    #[test]
    fn test_challenge_rfc7636_vector() {
        // Appendix B of RFC 7636
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_state_length_follows_byte_count() {
        let state = generate_state(32).unwrap();
        assert_eq!(state.len(), 43);
        assert!(is_url_safe(&state));
        assert_ne!(state, generate_state(32).unwrap());
    }

    #[test]
    fn test_debug_redacts_verifier() {
        let pkce = Pkce::generate().unwrap();
        let debug = format!("{:?}", pkce);
        assert!(!debug.contains(pkce.code_verifier()));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_code_challenge_method() {
        assert_eq!(Pkce::code_challenge_method(), "S256");
    }
}

/// Bridges a callback-driven web authentication surface into a single async result
use crate::authorize::{parse_callback, AuthorizationCode};
use crate::error::{AuthError, Result};
use std::sync::Arc;
use tokio::sync::oneshot;
use url::Url;

/// What the interactive surface is asked to present
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    /// Scheme of the redirect URI that ends the interaction
    pub callback_scheme: Option<String>,
}

/// Failure reported by an interactive surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The user dismissed the surface
    Cancelled,
    Failed(String),
}

/// Redirect URL (if any) or failure, delivered once by the surface
pub type SurfaceResult = std::result::Result<Option<String>, SurfaceError>;

/// Single-use completion handle given to a [`WebAuthenticator`]
///
/// `complete` consumes the handle, so a surface can resolve an attempt at
/// most once. Dropping it without completing fails the attempt.
#[derive(Debug)]
pub struct Completion {
    sender: oneshot::Sender<SurfaceResult>,
}

impl Completion {
    pub fn complete(self, result: SurfaceResult) {
        // The receiver is gone only if the sign-in future was dropped.
        let _ = self.sender.send(result);
    }

    pub fn redirect(self, url: impl Into<String>) {
        self.complete(Ok(Some(url.into())));
    }

    pub fn cancel(self) {
        self.complete(Err(SurfaceError::Cancelled));
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.complete(Err(SurfaceError::Failed(reason.into())));
    }
}

/// External interactive authentication surface (system browser, web view, ...)
pub trait WebAuthenticator: Send + Sync {
    /// Present `request` and eventually resolve `completion` exactly once.
    ///
    /// Returning an error means the surface could not be started at all.
    fn start(
        &self,
        request: AuthorizationRequest,
        completion: Completion,
    ) -> std::result::Result<(), SurfaceError>;
}

/// Outcome of one interactive authorization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Code(AuthorizationCode),
    /// User-initiated cancellation, not an error
    Cancelled,
}

/// Runs one authorization attempt against a [`WebAuthenticator`]
#[derive(Clone)]
pub struct Coordinator {
    surface: Arc<dyn WebAuthenticator>,
}

impl Coordinator {
    pub fn new(surface: Arc<dyn WebAuthenticator>) -> Self {
        Self { surface }
    }

    /// Present `url` and wait for the surface to report back.
    ///
    /// The redirect is validated against `expected_state` before any code is
    /// returned.
    pub async fn authenticate(
        &self,
        url: Url,
        callback_scheme: Option<String>,
        expected_state: &str,
    ) -> Result<AuthorizationOutcome> {
        let (sender, receiver) = oneshot::channel();
        let request = AuthorizationRequest {
            url,
            callback_scheme,
        };

        self.surface
            .start(request, Completion { sender })
            .map_err(|e| match e {
                SurfaceError::Cancelled => {
                    AuthError::AuthorizationSessionFailed("surface refused to start".into())
                }
                SurfaceError::Failed(reason) => AuthError::AuthorizationSessionFailed(reason),
            })?;

        let result = receiver.await.map_err(|_| {
            AuthError::AuthorizationSessionFailed("surface dropped without completing".into())
        })?;

        match result {
            Err(SurfaceError::Cancelled) => {
                tracing::info!("authorization cancelled by user");
                Ok(AuthorizationOutcome::Cancelled)
            }
            Err(SurfaceError::Failed(reason)) => Err(AuthError::AuthorizationSessionFailed(reason)),
            Ok(None) => Err(AuthError::InvalidCallbackUrl),
            Ok(Some(redirect)) => {
                parse_callback(&redirect, expected_state).map(AuthorizationOutcome::Code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Surface that completes immediately with a canned result
    struct Canned {
        result: Mutex<Option<SurfaceResult>>,
        seen: Mutex<Option<AuthorizationRequest>>,
    }

    impl Canned {
        fn new(result: SurfaceResult) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
                seen: Mutex::new(None),
            })
        }
    }

    impl WebAuthenticator for Canned {
        fn start(
            &self,
            request: AuthorizationRequest,
            completion: Completion,
        ) -> std::result::Result<(), SurfaceError> {
            *self.seen.lock() = Some(request);
            match self.result.lock().take() {
                Some(result) => completion.complete(result),
                None => drop(completion),
            }
            Ok(())
        }
    }

    struct Broken;

    impl WebAuthenticator for Broken {
        fn start(
            &self,
            _request: AuthorizationRequest,
            _completion: Completion,
        ) -> std::result::Result<(), SurfaceError> {
            Err(SurfaceError::Failed("no browser".into()))
        }
    }

    fn url() -> Url {
        Url::parse("https://auth.example.com/authorize?state=S").unwrap()
    }

    #[tokio::test]
    async fn test_redirect_yields_code() {
        let surface = Canned::new(Ok(Some("myapp:/cb?code=abc123&state=S".into())));
        let coordinator = Coordinator::new(surface.clone());

        let outcome = coordinator
            .authenticate(url(), Some("myapp".into()), "S")
            .await
            .unwrap();

        match outcome {
            AuthorizationOutcome::Code(code) => assert_eq!(code.code, "abc123"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let seen = surface.seen.lock().clone().unwrap();
        assert_eq!(seen.callback_scheme.as_deref(), Some("myapp"));
    }

    #[tokio::test]
    async fn test_cancellation_is_not_an_error() {
        let coordinator = Coordinator::new(Canned::new(Err(SurfaceError::Cancelled)));
        let outcome = coordinator.authenticate(url(), None, "S").await.unwrap();
        assert_eq!(outcome, AuthorizationOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_redirect_is_invalid_callback() {
        let coordinator = Coordinator::new(Canned::new(Ok(None)));
        let result = coordinator.authenticate(url(), None, "S").await;
        assert!(matches!(result, Err(AuthError::InvalidCallbackUrl)));
    }

    #[tokio::test]
    async fn test_state_mismatch_is_rejected() {
        let surface = Canned::new(Ok(Some("myapp:/cb?code=abc123&state=other".into())));
        let result = Coordinator::new(surface).authenticate(url(), None, "S").await;
        assert!(matches!(result, Err(AuthError::StateMismatch)));
    }

    #[tokio::test]
    async fn test_surface_failure_is_wrapped() {
        let surface = Canned::new(Err(SurfaceError::Failed("web view crashed".into())));
        let result = Coordinator::new(surface).authenticate(url(), None, "S").await;
        assert!(matches!(result, Err(AuthError::AuthorizationSessionFailed(reason)) if reason == "web view crashed"));
    }

    #[tokio::test]
    async fn test_dropped_completion_fails() {
        let surface = Canned::new(Ok(None));
        surface.result.lock().take();
        let result = Coordinator::new(surface).authenticate(url(), None, "S").await;
        assert!(matches!(result, Err(AuthError::AuthorizationSessionFailed(_))));
    }

    #[tokio::test]
    async fn test_surface_that_cannot_start() {
        let result = Coordinator::new(Arc::new(Broken))
            .authenticate(url(), None, "S")
            .await;
        assert!(matches!(result, Err(AuthError::AuthorizationSessionFailed(reason)) if reason == "no browser"));
    }
}

/// OAuth session orchestration: sign-in, token access, refresh and sign-out
use crate::authorize::build_authorization_url;
use crate::clock::{Clock, SystemClock};
use crate::config::{OAuthConfig, SessionSettings};
use crate::coordinator::{AuthorizationOutcome, Coordinator, WebAuthenticator};
use crate::endpoint::TokenEndpointClient;
use crate::error::{AuthError, Result};
use crate::pkce::{self, Pkce};
use crate::store::{CredentialStore, KeyringStore, TokenStore};
use crate::token::TokenRecord;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

/// Observable authentication state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    Authenticating,
    SignedIn,
}

/// How a completed `sign_in` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInOutcome {
    SignedIn,
    /// The user dismissed the authorization surface
    Cancelled,
}

enum Phase {
    SignedOut,
    Authenticating {
        attempt: u64,
        code_verifier: String,
        state: String,
        /// Session to fall back to if this attempt does not complete
        previous: Option<TokenRecord>,
    },
    SignedIn(TokenRecord),
}

impl Phase {
    fn public(&self) -> AuthState {
        match self {
            Phase::SignedOut => AuthState::SignedOut,
            Phase::Authenticating { .. } => AuthState::Authenticating,
            Phase::SignedIn(_) => AuthState::SignedIn,
        }
    }

    fn record(&self) -> Option<&TokenRecord> {
        match self {
            Phase::SignedIn(record) => Some(record),
            Phase::Authenticating { previous, .. } => previous.as_ref(),
            Phase::SignedOut => None,
        }
    }
}

struct SessionCell {
    phase: Phase,
    /// Bumped whenever the session is replaced; stale results never commit
    epoch: u64,
    next_attempt: u64,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenRecord>>>;

struct PendingRefresh {
    id: u64,
    epoch: u64,
    future: RefreshFuture,
}

struct Inner {
    config: OnceLock<OAuthConfig>,
    settings: SessionSettings,
    store: TokenStore,
    endpoints: TokenEndpointClient,
    coordinator: Coordinator,
    clock: Arc<dyn Clock>,
    // Lock order: `session` before `refresh`.
    session: Mutex<SessionCell>,
    refresh: Mutex<Option<PendingRefresh>>,
    refresh_ids: AtomicU64,
    state_tx: watch::Sender<AuthState>,
}

/// Abandons a sign-in attempt when dropped; a no-op once the attempt has
/// completed or been replaced
struct AttemptGuard {
    inner: Arc<Inner>,
    attempt: u64,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.inner.abandon(self.attempt);
    }
}

/// Public-client OAuth session shared by every caller that needs a token
///
/// Cloning is cheap and every clone drives the same session. All state
/// changes and every write to the token store go through one lock, so
/// concurrent callers never observe or persist a half-updated session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

/// Builder for [`SessionManager`]
pub struct SessionManagerBuilder {
    authenticator: Arc<dyn WebAuthenticator>,
    config: Option<OAuthConfig>,
    settings: SessionSettings,
    credentials: Option<Arc<dyn CredentialStore>>,
    clock: Option<Arc<dyn Clock>>,
    http: Option<reqwest::Client>,
}

impl SessionManagerBuilder {
    pub fn config(mut self, config: OAuthConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Credential backend, the OS keyring by default
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Reuse an existing HTTP client instead of building one from the settings
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Build the manager and restore any persisted session
    pub fn build(self) -> Result<SessionManager> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let endpoints = match self.http {
            Some(http) => TokenEndpointClient::with_http_client(http, clock.clone()),
            None => TokenEndpointClient::new(self.settings.http_timeout, clock.clone())?,
        };
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(KeyringStore::new()));
        let store = TokenStore::new(
            credentials,
            self.settings.store_service.clone(),
            self.settings.store_account.clone(),
        );

        let config = OnceLock::new();
        if let Some(initial) = self.config {
            initial.validate()?;
            let _ = config.set(initial);
        }

        let phase = restore(&store, clock.now());
        let (state_tx, _) = watch::channel(phase.public());

        Ok(SessionManager {
            inner: Arc::new(Inner {
                config,
                settings: self.settings,
                store,
                endpoints,
                coordinator: Coordinator::new(self.authenticator),
                clock,
                session: Mutex::new(SessionCell {
                    phase,
                    epoch: 0,
                    next_attempt: 0,
                }),
                refresh: Mutex::new(None),
                refresh_ids: AtomicU64::new(0),
                state_tx,
            }),
        })
    }
}

/// Initial phase from whatever the store holds
fn restore(store: &TokenStore, now: u64) -> Phase {
    match store.load() {
        Ok(Some(record)) if record.is_usable(now) => {
            tracing::info!("restored signed-in session from secure store");
            Phase::SignedIn(record)
        }
        Ok(Some(_)) => {
            tracing::info!("stored access token expired without a refresh token, signing out");
            if let Err(e) = store.clear() {
                tracing::warn!(error = %e, "failed to clear expired token record");
            }
            Phase::SignedOut
        }
        Ok(None) => Phase::SignedOut,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load token record, starting signed out");
            Phase::SignedOut
        }
    }
}

impl SessionManager {
    /// Start building a manager around an interactive authentication surface
    pub fn builder(authenticator: Arc<dyn WebAuthenticator>) -> SessionManagerBuilder {
        SessionManagerBuilder {
            authenticator,
            config: None,
            settings: SessionSettings::default(),
            credentials: None,
            clock: None,
            http: None,
        }
    }

    /// Set the OAuth configuration. It can be set only once.
    pub fn configure(&self, config: OAuthConfig) -> Result<()> {
        config.validate()?;
        self.inner
            .config
            .set(config)
            .map_err(|_| AuthError::InvalidConfiguration("session is already configured".into()))
    }

    pub fn config(&self) -> Result<&OAuthConfig> {
        self.inner.config.get().ok_or(AuthError::MissingConfiguration)
    }

    pub fn state(&self) -> AuthState {
        self.inner.session.lock().phase.public()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == AuthState::SignedIn
    }

    /// Snapshot of the current token record, if signed in
    pub fn current_token(&self) -> Option<TokenRecord> {
        match &self.inner.session.lock().phase {
            Phase::SignedIn(record) => Some(record.clone()),
            _ => None,
        }
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state_tx.subscribe()
    }

    /// Run the interactive authorization code flow with PKCE.
    ///
    /// Cancellation by the user resolves to [`SignInOutcome::Cancelled`]
    /// rather than an error. A second call while one is pending fails with
    /// [`AuthError::SignInInProgress`].
    pub async fn sign_in(&self) -> Result<SignInOutcome> {
        let config = self.config()?.clone();

        let pkce = Pkce::generate()?;
        let csrf_state = pkce::generate_state(self.inner.settings.state_bytes)?;
        let url = build_authorization_url(&config, pkce.code_challenge(), &csrf_state)?;

        let attempt = {
            let mut session = self.inner.session.lock();
            if matches!(session.phase, Phase::Authenticating { .. }) {
                return Err(AuthError::SignInInProgress);
            }
            session.epoch += 1;
            session.next_attempt += 1;
            let attempt = session.next_attempt;
            let previous = match std::mem::replace(&mut session.phase, Phase::SignedOut) {
                Phase::SignedIn(record) => Some(record),
                _ => None,
            };
            session.phase = Phase::Authenticating {
                attempt,
                code_verifier: pkce.into_verifier(),
                state: csrf_state.clone(),
                previous,
            };
            self.inner.publish(&session);
            attempt
        };

        // Whatever way this future ends, including being dropped, the
        // attempt leaves the authenticating phase.
        let _guard = AttemptGuard {
            inner: Arc::clone(&self.inner),
            attempt,
        };

        tracing::info!(attempt, "starting authorization code flow");

        let outcome = self
            .inner
            .coordinator
            .authenticate(url, config.redirect_scheme(), &csrf_state)
            .await;

        let code = match outcome {
            Ok(AuthorizationOutcome::Code(code)) => code,
            Ok(AuthorizationOutcome::Cancelled) => return Ok(SignInOutcome::Cancelled),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "authorization failed");
                return Err(e);
            }
        };

        let code_verifier = self.inner.pending_verifier(attempt, &code.state)?;

        let record = match self
            .inner
            .endpoints
            .exchange(&code.code, &code_verifier, &config)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "token exchange failed");
                return Err(e);
            }
        };
        drop(code_verifier);

        self.inner.complete(attempt, record)?;
        tracing::info!(attempt, "signed in");
        Ok(SignInOutcome::SignedIn)
    }

    /// Return a valid access token, refreshing it first if needed.
    ///
    /// Concurrent callers share a single in-flight refresh. Without a usable
    /// session this fails with [`AuthError::NoValidRefreshToken`]; use
    /// [`SessionManager::state`] to tell a never-signed-in user apart.
    pub async fn get_access_token(&self) -> Result<String> {
        let refresh = {
            let mut session = self.inner.session.lock();
            let now = self.inner.clock.now();
            let buffer = self.inner.settings.expiry_buffer_secs;

            let record = match session.phase.record() {
                Some(record) => record.clone(),
                None => return Err(AuthError::NoValidRefreshToken),
            };

            if record.is_fresh(now, buffer) {
                return Ok(record.access_token);
            }
            if !record.can_refresh() {
                if !record.is_expired(now) {
                    return Ok(record.access_token);
                }
                tracing::info!("access token expired and cannot be refreshed");
                if let Err(e) = self.inner.discard_record_locked(&mut session) {
                    tracing::warn!(error = %e, "failed to clear expired token record");
                }
                return Err(AuthError::NoValidRefreshToken);
            }
            if !matches!(session.phase, Phase::SignedIn(_)) {
                // A pending sign-in replaces the old session anyway.
                return Err(AuthError::NoValidRefreshToken);
            }

            let config = self.config()?.clone();
            Inner::refresh_future(&self.inner, &session, record, config)
        };

        refresh.await.map(|record| record.access_token)
    }

    /// Send a request with `Authorization: Bearer <token>` attached.
    ///
    /// JSON bodies are sent as `application/json`. The response status is
    /// left for the caller to interpret.
    pub async fn send_authenticated(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let token = self.get_access_token().await?;

        let mut request = self
            .inner
            .endpoints
            .http()
            .request(method, url)
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| AuthError::ApiRequestFailed(e.to_string()))
    }

    /// Revoke the grant on a best-effort basis, then always clear local state.
    ///
    /// Only a failure to erase the local store is reported.
    pub async fn sign_out(&self) -> Result<()> {
        let token = {
            let session = self.inner.session.lock();
            session
                .phase
                .record()
                .map(|record| record.revocation_token().to_string())
        };

        if let (Some(token), Ok(config)) = (token, self.config()) {
            if let Err(e) = self.inner.endpoints.revoke(&token, config).await {
                tracing::warn!(error = %e, "token revocation failed, clearing local session anyway");
            }
        }

        let mut session = self.inner.session.lock();
        let cleared = self.inner.clear_locked(&mut session);
        tracing::info!("signed out");
        cleared
    }
}

impl Inner {
    fn publish(&self, session: &SessionCell) {
        self.state_tx.send_replace(session.phase.public());
    }

    /// Clone the verifier of a still-current attempt
    fn pending_verifier(&self, attempt: u64, returned_state: &str) -> Result<String> {
        let session = self.session.lock();
        match &session.phase {
            Phase::Authenticating {
                attempt: current,
                code_verifier,
                state,
                ..
            } if *current == attempt && state == returned_state => Ok(code_verifier.clone()),
            _ => Err(AuthError::AuthorizationSessionFailed(
                "sign-in attempt was abandoned".into(),
            )),
        }
    }

    /// Leave the authenticating phase of `attempt` without new tokens
    fn abandon(&self, attempt: u64) {
        let mut session = self.session.lock();
        let previous = match &mut session.phase {
            Phase::Authenticating {
                attempt: current,
                previous,
                ..
            } if *current == attempt => previous.take(),
            _ => return,
        };
        session.phase = match previous {
            Some(record) => Phase::SignedIn(record),
            None => Phase::SignedOut,
        };
        self.publish(&session);
    }

    /// Persist the exchanged tokens and enter the signed-in phase
    fn complete(&self, attempt: u64, record: TokenRecord) -> Result<()> {
        let mut session = self.session.lock();
        let still_current = matches!(
            &session.phase,
            Phase::Authenticating { attempt: current, .. } if *current == attempt
        );
        if !still_current {
            return Err(AuthError::AuthorizationSessionFailed(
                "sign-in attempt was abandoned".into(),
            ));
        }

        if let Err(e) = self.store.save(&record) {
            drop(session);
            self.abandon(attempt);
            return Err(e);
        }

        session.phase = Phase::SignedIn(record);
        self.publish(&session);
        Ok(())
    }

    /// Drop every trace of the session, in memory and in the store
    fn clear_locked(&self, session: &mut SessionCell) -> Result<()> {
        session.epoch += 1;
        session.phase = Phase::SignedOut;
        *self.refresh.lock() = None;
        self.publish(session);
        self.store.clear()
    }

    /// Drop a dead token record. A pending sign-in attempt is left intact and
    /// only loses the session it would have fallen back to.
    fn discard_record_locked(&self, session: &mut SessionCell) -> Result<()> {
        if let Phase::Authenticating { previous, .. } = &mut session.phase {
            *previous = None;
            return self.store.clear();
        }
        self.clear_locked(session)
    }

    /// Join the in-flight refresh for this session or start one
    fn refresh_future(
        this: &Arc<Self>,
        session: &SessionCell,
        record: TokenRecord,
        config: OAuthConfig,
    ) -> RefreshFuture {
        let mut slot = this.refresh.lock();
        if let Some(pending) = slot.as_ref() {
            if pending.epoch == session.epoch {
                return pending.future.clone();
            }
        }

        let id = this.refresh_ids.fetch_add(1, Ordering::Relaxed);
        let epoch = session.epoch;
        // The slot owns this future, so it must not own the manager.
        let inner = Arc::downgrade(this);
        let endpoints = this.endpoints.clone();
        let future = async move {
            let result = endpoints.refresh(&record, &config).await;
            match inner.upgrade() {
                Some(inner) => inner.commit_refresh(id, epoch, result),
                None => Err(AuthError::NoValidRefreshToken),
            }
        }
        .boxed()
        .shared();

        *slot = Some(PendingRefresh {
            id,
            epoch,
            future: future.clone(),
        });
        future
    }

    /// Apply the outcome of refresh `id` started under `epoch`
    fn commit_refresh(
        &self,
        id: u64,
        epoch: u64,
        result: Result<TokenRecord>,
    ) -> Result<TokenRecord> {
        let mut session = self.session.lock();
        {
            let mut slot = self.refresh.lock();
            if slot.as_ref().map(|pending| pending.id) == Some(id) {
                *slot = None;
            }
        }

        if session.epoch != epoch {
            tracing::debug!("discarding refresh result for a replaced session");
            return Err(AuthError::NoValidRefreshToken);
        }

        match result {
            Ok(record) => {
                if let Err(e) = self.store.save(&record) {
                    tracing::warn!(error = %e, "failed to persist refreshed token");
                }
                session.phase = Phase::SignedIn(record.clone());
                self.publish(&session);
                tracing::info!("access token refreshed");
                Ok(record)
            }
            Err(AuthError::RefreshTokenInvalid { status }) => {
                tracing::info!(status, "refresh token rejected, signing out");
                if let Err(e) = self.clear_locked(&mut session) {
                    tracing::warn!(error = %e, "failed to clear rejected token record");
                }
                Err(AuthError::NoValidRefreshToken)
            }
            Err(e) => Err(e),
        }
    }
}

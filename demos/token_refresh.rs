/// Example: Token Refresh
///
/// Runs entirely offline against a local fake provider. Signs in through a
/// scripted surface, moves a manual clock past the token lifetime and shows
/// several concurrent callers sharing one refresh request.
///
/// Run:
/// RUST_LOG=einlass=debug cargo run --example token_refresh
use einlass::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT_URI: &str = "com.example.app:/oauth2redirect";

/// Approves every request immediately, as a user clicking "Allow" would
struct AutoApprove;

impl WebAuthenticator for AutoApprove {
    fn start(
        &self,
        request: AuthorizationRequest,
        completion: Completion,
    ) -> Result<(), SurfaceError> {
        let state = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| SurfaceError::Failed("authorization URL has no state".into()))?;

        completion.redirect(format!("{}?code=demo-code&state={}", REDIRECT_URI, state));
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Token Refresh Example ===\n");

    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"access_token":"access-1","expires_in":3600,"refresh_token":"refresh-1","token_type":"Bearer"}"#,
        ))
        .mount(&provider)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"access_token":"access-2","expires_in":3600,"token_type":"Bearer"}"#)
                .set_delay(Duration::from_millis(250)),
        )
        .mount(&provider)
        .await;

    let config = OAuthConfig::new(
        "example-client",
        REDIRECT_URI,
        &["read", "write"],
        format!("{}/authorize", provider.uri()),
        format!("{}/token", provider.uri()),
        format!("{}/revoke", provider.uri()),
    );

    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let session = SessionManager::builder(Arc::new(AutoApprove))
        .config(config)
        .credential_store(Arc::new(MemoryStore::new()))
        .clock(clock.clone())
        .build()
        .expect("Failed to create session manager");

    session.sign_in().await.expect("Sign-in failed");
    let token = session.current_token().expect("No token after sign-in");
    println!("Signed in");
    println!("  Access token: {}", token.access_token);
    println!("  Expires at:   {}\n", token.expires_at());

    println!("Advancing the clock by one hour...\n");
    clock.advance(3_600);

    let callers: Vec<_> = (0..5)
        .map(|i| {
            let session = session.clone();
            tokio::spawn(async move { (i, session.get_access_token().await) })
        })
        .collect();

    for caller in callers {
        match caller.await.expect("caller panicked") {
            (i, Ok(token)) => println!("  caller {} got {}", i, token),
            (i, Err(e)) => println!("  caller {} failed: {}", i, e),
        }
    }

    let refreshes = provider
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| String::from_utf8_lossy(&request.body).contains("grant_type=refresh_token"))
        .count();
    println!("\n✓ {} refresh request(s) sent for 5 callers", refreshes);

    let token = session.current_token().expect("Session lost after refresh");
    println!(
        "  Refresh token kept: {}",
        token.refresh_token.as_deref().unwrap_or("<none>")
    );
}

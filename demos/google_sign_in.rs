/// Example: Google sign-in from a desktop application
///
/// Opens the system browser, receives the redirect on a loopback port and
/// keeps the tokens in the OS keyring. Running it again reuses the stored
/// session instead of prompting.
///
/// Setup:
/// 1. Create an OAuth client of type "Desktop app" in the Google Cloud console
/// 2. export GOOGLE_CLIENT_ID="your_client_id.apps.googleusercontent.com"
///
/// Run:
/// RUST_LOG=einlass=debug cargo run --example google_sign_in
/// cargo run --example google_sign_in -- --sign-out
use einlass::prelude::*;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client_id = env::var("GOOGLE_CLIENT_ID").expect(
        "GOOGLE_CLIENT_ID environment variable not set. \
         Create a desktop OAuth client at https://console.cloud.google.com/apis/credentials",
    );

    println!("=== Google Sign-In Example ===\n");

    let surface = LoopbackAuthenticator::ephemeral().expect("Failed to bind loopback listener");
    let config = OAuthConfig::google(client_id, surface.redirect_uri(), &["openid", "email"]);

    let session = SessionManager::builder(Arc::new(surface))
        .config(config)
        .settings(SessionSettings::for_app("google-example"))
        .credential_store(Arc::new(KeyringStore::new()))
        .build()
        .expect("Failed to create session manager");

    if env::args().any(|arg| arg == "--sign-out") {
        match session.sign_out().await {
            Ok(()) => println!("✓ Signed out, stored tokens removed"),
            Err(e) => eprintln!("✗ Sign-out failed: {}", e),
        }
        return;
    }

    if session.is_authenticated() {
        println!("Found a stored session, skipping the browser.\n");
    } else {
        println!("Opening the browser to sign in...\n");
        match session.sign_in().await {
            Ok(SignInOutcome::SignedIn) => println!("✓ Signed in"),
            Ok(SignInOutcome::Cancelled) => {
                println!("Sign-in cancelled.");
                return;
            }
            Err(e) => {
                eprintln!("✗ Sign-in failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let response = session
        .send_authenticated(
            reqwest::Method::GET,
            "https://openidconnect.googleapis.com/v1/userinfo",
            None,
        )
        .await;

    match response {
        Ok(response) if response.status().is_success() => {
            let profile: serde_json::Value = response.json().await.unwrap_or_default();
            println!(
                "Signed in as: {}",
                profile["email"].as_str().unwrap_or("<no email scope>")
            );
        }
        Ok(response) => eprintln!("✗ userinfo returned HTTP {}", response.status()),
        Err(e) if e.is_terminal() => eprintln!("✗ Session ended, sign in again: {}", e),
        Err(e) => eprintln!("✗ Request failed: {}", e),
    }
}

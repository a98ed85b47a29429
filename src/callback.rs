/// System browser surface with a loopback HTTP listener for the redirect
use crate::coordinator::{AuthorizationRequest, Completion, SurfaceError, WebAuthenticator};
use crate::error::{AuthError, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};
use url::Url;

/// Default time the user has to finish signing in
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Opens the authorization URL in the system browser and waits for the
/// redirect on a loopback listener
///
/// The redirect URI registered with the provider must be
/// `http://127.0.0.1:<port>/<path>` (or `localhost`).
pub struct LoopbackAuthenticator {
    listener: TcpListener,
    redirect_uri: Url,
    timeout: Duration,
    open_browser: bool,
}

impl LoopbackAuthenticator {
    /// Listen on the host and port of `redirect_uri`
    pub fn bind(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| AuthError::InvalidConfiguration(format!("redirect_uri: {}", e)))?;
        if url.scheme() != "http" {
            return Err(AuthError::InvalidConfiguration(
                "loopback redirect_uri must use http".into(),
            ));
        }
        let host = url.host_str().unwrap_or_default().to_string();
        if host != "127.0.0.1" && host != "localhost" {
            return Err(AuthError::InvalidConfiguration(
                "loopback redirect_uri must point at 127.0.0.1 or localhost".into(),
            ));
        }
        let port = url.port().unwrap_or(80);

        let listener = TcpListener::bind(("127.0.0.1", port)).map_err(|e| {
            AuthError::AuthorizationSessionFailed(format!("Failed to bind callback listener: {}", e))
        })?;

        Self::from_listener(listener, url)
    }

    /// Listen on a random free port with path `/callback`
    pub fn ephemeral() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| {
            AuthError::AuthorizationSessionFailed(format!("Failed to bind callback listener: {}", e))
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::AuthorizationSessionFailed(e.to_string()))?
            .port();
        let url = Url::parse(&format!("http://127.0.0.1:{}/callback", port))
            .map_err(|e| AuthError::InvalidConfiguration(e.to_string()))?;

        Self::from_listener(listener, url)
    }

    fn from_listener(listener: TcpListener, redirect_uri: Url) -> Result<Self> {
        // Non-blocking accept lets the wait loop honour its deadline.
        listener
            .set_nonblocking(true)
            .map_err(|e| AuthError::AuthorizationSessionFailed(e.to_string()))?;

        Ok(Self {
            listener,
            redirect_uri,
            timeout: DEFAULT_CALLBACK_TIMEOUT,
            open_browser: true,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log the authorization URL instead of launching a browser
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// The redirect URI to register in the [`crate::config::OAuthConfig`]
    pub fn redirect_uri(&self) -> String {
        self.redirect_uri.to_string()
    }

    pub fn port(&self) -> u16 {
        self.redirect_uri.port().unwrap_or(80)
    }
}

impl WebAuthenticator for LoopbackAuthenticator {
    fn start(
        &self,
        request: AuthorizationRequest,
        completion: Completion,
    ) -> std::result::Result<(), SurfaceError> {
        let listener = self
            .listener
            .try_clone()
            .map_err(|e| SurfaceError::Failed(format!("Failed to clone listener: {}", e)))?;

        if self.open_browser {
            webbrowser::open(request.url.as_str())
                .map_err(|e| SurfaceError::Failed(format!("Failed to open browser: {}", e)))?;
        } else {
            tracing::info!(url = %request.url, "open this URL in your browser to sign in");
        }

        let redirect_uri = self.redirect_uri.clone();
        let deadline = Instant::now() + self.timeout;
        std::thread::spawn(move || {
            match wait_for_callback(&listener, &redirect_uri, deadline) {
                Ok(redirect) => completion.redirect(redirect),
                Err(reason) => completion.fail(reason),
            }
        });

        Ok(())
    }
}

/// Accept connections until the redirect arrives or `deadline` passes
fn wait_for_callback(
    listener: &TcpListener,
    redirect_uri: &Url,
    deadline: Instant,
) -> std::result::Result<String, String> {
    loop {
        if Instant::now() > deadline {
            return Err("Timeout waiting for callback".into());
        }

        match listener.accept() {
            Ok((stream, _)) => match handle_request(stream, redirect_uri) {
                Ok(Some(redirect)) => return Ok(redirect),
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring malformed callback request");
                    continue;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(format!("Callback listener failed: {}", e)),
        }
    }
}

fn handle_request(stream: TcpStream, redirect_uri: &Url) -> std::io::Result<Option<String>> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // Drain the headers so closing the socket does not reset the connection.
    let mut header = String::new();
    while reader.read_line(&mut header)? > 0 && !header.trim_end().is_empty() {
        header.clear();
    }

    // GET /callback?code=...&state=... HTTP/1.1
    let Some(target) = request_line.split_whitespace().nth(1) else {
        send_response(stream, "400 Bad Request", &failure_page("Invalid request"))?;
        return Ok(None);
    };

    let path = target.split('?').next().unwrap_or_default();
    if path != redirect_uri.path() {
        send_response(stream, "404 Not Found", &failure_page("Not found"))?;
        return Ok(None);
    }

    let redirect = match redirect_uri.join(target) {
        Ok(url) => url.to_string(),
        Err(_) => {
            send_response(stream, "400 Bad Request", &failure_page("Invalid callback"))?;
            return Ok(None);
        }
    };

    if target.contains("error=") {
        send_response(
            stream,
            "400 Bad Request",
            &failure_page("The provider reported an error. You can close this window."),
        )?;
    } else {
        send_response(stream, "200 OK", SUCCESS_PAGE)?;
    }

    Ok(Some(redirect))
}

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Signed in</title></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, sans-serif; text-align: center; margin-top: 20vh;">
    <h1>Authorization Successful!</h1>
    <p>You can close this window and return to the application.</p>
</body>
</html>"#;

fn failure_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Authorization Failed</title></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, sans-serif; text-align: center; margin-top: 20vh;">
    <h1>Authorization Failed</h1>
    <p>{}</p>
</body>
</html>"#,
        message
    )
}

fn send_response(mut stream: TcpStream, status: &str, html: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        html.len(),
        html
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()
}

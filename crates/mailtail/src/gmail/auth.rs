//! Gmail OAuth2 authentication
//!
//! Implements the OAuth2 installed-app flow: the user is sent to Google's
//! consent page and the authorization code comes back to a loopback listener.
//! Tokens are persisted to a JSON file and refreshed when they expire.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.
//!
//! Interactive prompts go to stderr; stdout belongs to the message stream.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Seconds before expiry at which a token is considered stale
const EXPIRY_MARGIN_SECS: i64 = 300;

/// OAuth2 client configuration and token management for Gmail
pub struct GmailAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
    cached: Mutex<Option<StoredToken>>,
}

/// Token as persisted on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| exp > chrono::Utc::now().timestamp() + EXPIRY_MARGIN_SECS)
    }
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Read-only access is all a tail needs
    const GMAIL_READONLY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.readonly";

    /// Port range to try for the loopback callback listener
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Create a new GmailAuth storing tokens at `token_path`
    pub fn new(client_id: String, client_secret: String, token_path: impl Into<PathBuf>) -> Self {
        Self {
            client_id,
            client_secret,
            token_path: token_path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Default token location (~/.config/gmailtail/token.json)
    pub fn default_token_path() -> Result<PathBuf> {
        config::config_path("token.json").context("Could not determine config directory")
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Get a valid access token, refreshing or re-authenticating as needed
    pub fn get_access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());

        if cached.is_none() {
            *cached = self.load_token().ok();
        }

        if let Some(token) = cached.as_ref() {
            if token.is_fresh() {
                return Ok(token.access_token.clone());
            }

            if let Some(refresh_token) = token.refresh_token.clone() {
                match self.refresh(&refresh_token) {
                    Ok(response) => {
                        let stored = self.store(response, Some(refresh_token))?;
                        let access = stored.access_token.clone();
                        *cached = Some(stored);
                        return Ok(access);
                    }
                    Err(e) => debug!("Token refresh failed, re-authenticating: {e:#}"),
                }
            }
        }

        let response = self.authorize_interactively()?;
        let stored = self.store(response, None)?;
        let access = stored.access_token.clone();
        *cached = Some(stored);
        Ok(access)
    }

    /// Check whether a usable token is already stored
    pub fn is_authenticated(&self) -> bool {
        self.load_token()
            .is_ok_and(|t| t.is_fresh() || t.refresh_token.is_some())
    }

    /// Run the authorization code flow against a loopback listener
    fn authorize_interactively(&self) -> Result<TokenResponse> {
        let (listener, port) = Self::bind_loopback()?;
        let redirect_uri = format!("http://127.0.0.1:{port}");

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::GMAIL_READONLY_SCOPE),
        );

        eprintln!("Gmail authorization required.");
        eprintln!("If the browser doesn't open, visit: {auth_url}");
        if let Err(e) = open::that(&auth_url) {
            debug!("Failed to open browser: {e}");
        }

        let code = Self::receive_code(&listener)?;

        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        info!("Gmail authorization completed");
        Ok(token)
    }

    fn bind_loopback() -> Result<(TcpListener, u16)> {
        (Self::PORT_RANGE_START..=Self::PORT_RANGE_END)
            .find_map(|port| {
                TcpListener::bind(("127.0.0.1", port))
                    .ok()
                    .map(|listener| (listener, port))
            })
            .with_context(|| {
                format!(
                    "Could not bind to any port in range {}-{}",
                    Self::PORT_RANGE_START,
                    Self::PORT_RANGE_END
                )
            })
    }

    /// Accept the browser redirect and pull the authorization code out of it
    fn receive_code(listener: &TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept callback")?;

        let mut request_line = String::new();
        BufReader::new(&stream)
            .read_line(&mut request_line)
            .context("Failed to read callback request")?;

        // GET /?code=AUTH_CODE&scope=... HTTP/1.1
        let target = request_line.split_whitespace().nth(1).unwrap_or_default();
        let code = callback_param(target, "code");
        let error = callback_param(target, "error");

        let (status, text) = if code.is_some() {
            ("200 OK", "Authorization complete. You can close this window.")
        } else {
            ("400 Bad Request", "Authorization failed. Please try again.")
        };
        let page = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n{text}"
        );
        stream.write_all(page.as_bytes()).ok();

        if let Some(err) = error {
            anyhow::bail!("OAuth error: {err}");
        }
        code.context("No authorization code received")
    }

    fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse refresh response")
    }

    fn load_token(&self) -> Result<StoredToken> {
        config::load_json_file(&self.token_path)
    }

    /// Persist a token response; Google omits the refresh token on refresh
    fn store(
        &self,
        response: TokenResponse,
        previous_refresh: Option<String>,
    ) -> Result<StoredToken> {
        let stored = StoredToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: response
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs as i64),
        };
        config::save_json_file(&self.token_path, &stored)?;
        Ok(stored)
    }
}

/// Extract and percent-decode a query parameter from a request target
fn callback_param(target: &str, key: &str) -> Option<String> {
    let (_, query) = target.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| {
            urlencoding::decode(v)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| v.to_string())
        })
    })
}

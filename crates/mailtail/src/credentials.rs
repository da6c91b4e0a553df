//! OAuth client credentials
//!
//! Looked up in order:
//! 1. An explicit credentials file (`--credentials`)
//! 2. Credentials embedded at compile time
//! 3. `~/.config/gmailtail/credentials.json`
//! 4. `GMAIL_CLIENT_ID` / `GMAIL_CLIENT_SECRET`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Credentials filename in the gmailtail config directory
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// OAuth client id and secret for the Gmail API
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console download format
#[derive(Deserialize)]
struct CredentialFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Resolve credentials, preferring `explicit` when given
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }
        if let Some(path) = Self::default_credentials_path()
            && path.exists()
        {
            return Self::from_file(&path);
        }
        Self::from_env().context(
            "No OAuth credentials found: pass --credentials, place credentials.json \
             in the config directory, or set GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
        )
    }

    /// Build with GMAIL_CLIENT_ID=xxx GMAIL_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GMAIL_CLIENT_ID")?;
        let client_secret = option_env!("GMAIL_CLIENT_SECRET")?;
        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file: CredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(file)
            .with_context(|| format!("Invalid credentials file {}", path.display()))
    }

    /// Parse the Google Cloud Console JSON format
    pub fn from_json(json: &str) -> Result<Self> {
        let file: CredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(file)
    }

    fn from_credential_file(file: CredentialFile) -> Result<Self> {
        let secrets = file
            .installed
            .or(file.web)
            .context("Credentials file missing 'installed' or 'web' section")?;
        if secrets.client_id.is_empty() {
            bail!("Credentials file has an empty client_id");
        }

        Ok(Self {
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
        })
    }

    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// `~/.config/gmailtail/credentials.json`
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

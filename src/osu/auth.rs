//! OAuth credential lifecycle: obtain, refresh, persist, load.
//!
//! The token pair lives in a small JSON file between runs. Persistence is
//! write-after-confirm: a new pair is written only once the authorization
//! endpoint has actually issued it, via a temp-file rename so a crash
//! mid-write never clobbers the previous pair.

use super::errors::AuthError;
use super::json::parse_with_path;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct OauthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
}

pub struct CredentialManager {
    http: reqwest::Client,
    oauth: OauthConfig,
    path: PathBuf,
    timeout: Duration,
}

impl CredentialManager {
    pub fn new(
        oauth: OauthConfig,
        path: PathBuf,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            oauth,
            path,
            timeout,
        })
    }

    /// Read the last-persisted token pair.
    pub fn load(&self) -> Result<Credentials, AuthError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(AuthError::Corrupt),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AuthError::NotAuthenticated)
            }
            Err(e) => Err(AuthError::Io(e)),
        }
    }

    /// Exchange a one-time authorization code for the initial token pair.
    pub async fn obtain(&self, code: &str) -> Result<Credentials, AuthError> {
        let redirect_uri = self
            .oauth
            .redirect_uri
            .as_deref()
            .ok_or(AuthError::MissingRedirectUri)?;
        let params = [
            ("client_id", self.oauth.client_id.as_str()),
            ("client_secret", self.oauth.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        let creds = self.exchange(&params).await?;
        self.persist(&creds)?;
        info!("authorization code exchanged, token pair persisted");
        Ok(creds)
    }

    /// Exchange the stored refresh token for a new pair, overwriting the old
    /// one. Intended to run at most once per process.
    pub async fn refresh(&self) -> Result<Credentials, AuthError> {
        let current = self.load()?;
        let params = [
            ("client_id", self.oauth.client_id.as_str()),
            ("client_secret", self.oauth.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", current.refresh_token.as_str()),
            ("scope", "public identify"),
        ];
        let creds = self.exchange(&params).await?;
        self.persist(&creds)?;
        info!("token pair refreshed and persisted");
        Ok(creds)
    }

    async fn exchange(&self, params: &[(&str, &str)]) -> Result<Credentials, AuthError> {
        let resp = self
            .http
            .post(&self.oauth.token_url)
            .header(ACCEPT, "application/json")
            .form(params)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AuthError::Exchange {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        let token: TokenResponse =
            parse_with_path(&body).map_err(AuthError::MalformedResponse)?;
        Ok(Credentials {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        })
    }

    fn persist(&self, creds: &Credentials) -> Result<(), AuthError> {
        let encoded = serde_json::to_vec_pretty(creds).map_err(AuthError::Encode)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

//! Environment-driven configuration.

use crate::osu::{OauthConfig, RetryPolicy};
use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// PostgreSQL connection string. Optional so `sync --dry-run` and the
    /// auth subcommands work without a database.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    // osu! API access.
    #[serde(default)]
    pub osu_client_id: Option<String>,
    #[serde(default)]
    pub osu_client_secret: Option<String>,
    #[serde(default)]
    pub osu_redirect_uri: Option<String>,
    #[serde(default)]
    pub osu_user_id: Option<String>,
    #[serde(default = "default_osu_base_url")]
    pub osu_base_url: String,
    #[serde(default = "default_osu_token_url")]
    pub osu_token_url: String,

    // Input locations.
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_osu_export_path")]
    pub osu_export_path: PathBuf,
    #[serde(default = "default_otogame_export_dir")]
    pub otogame_export_dir: PathBuf,
    #[serde(default = "default_dx_export_dir")]
    pub dx_export_dir: PathBuf,

    // Fetch tuning.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_max_attempts")]
    pub fetch_max_attempts: u32,
    #[serde(default = "default_fetch_backoff_ms")]
    pub fetch_backoff_ms: u64,
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_osu_base_url() -> String {
    "https://osu.ppy.sh/api/v2".to_owned()
}

fn default_osu_token_url() -> String {
    "https://osu.ppy.sh/oauth/token".to_owned()
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from(".credentials.json")
}

fn default_osu_export_path() -> PathBuf {
    PathBuf::from("exports/osu/player_data.html")
}

fn default_otogame_export_dir() -> PathBuf {
    PathBuf::from("exports/otogame")
}

fn default_dx_export_dir() -> PathBuf {
    PathBuf::from("exports/dx")
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_fetch_max_attempts() -> u32 {
    10
}

fn default_fetch_backoff_ms() -> u64 {
    500
}

impl Config {
    pub fn load() -> Result<Self> {
        Figment::new()
            .merge(Env::raw())
            .extract()
            .context("failed to load config from environment")
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_max_attempts,
            backoff_base: Duration::from_millis(self.fetch_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    /// OAuth client settings, required for the auth subcommands and the osu
    /// source.
    pub fn oauth(&self) -> Result<OauthConfig> {
        Ok(OauthConfig {
            token_url: self.osu_token_url.clone(),
            client_id: self
                .osu_client_id
                .clone()
                .context("OSU_CLIENT_ID must be set")?,
            client_secret: self
                .osu_client_secret
                .clone()
                .context("OSU_CLIENT_SECRET must be set")?,
            redirect_uri: self.osu_redirect_uri.clone(),
        })
    }
}

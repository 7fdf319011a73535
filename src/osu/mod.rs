//! osu! v2 API client.
//!
//! Thin endpoint wrappers over the retrying fetcher; payloads stay as raw
//! JSON for the source-level normalizers to pick apart.

pub mod auth;
pub mod errors;
pub mod json;
pub mod retry;

pub use auth::{CredentialManager, Credentials, OauthConfig};
pub use errors::{AuthError, FetchError};
pub use retry::{Fetcher, RetryPolicy};

use serde_json::Value;
use std::time::Duration;

pub struct OsuApi {
    fetcher: Fetcher,
    base_url: String,
    timeout: Duration,
}

impl OsuApi {
    pub fn new(
        base_url: String,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            fetcher: Fetcher::new(policy)?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout,
        })
    }

    /// Fetch a beatmapset with its nested beatmap list.
    pub async fn get_mapset(&self, mapset_id: u64, token: &str) -> Result<Value, FetchError> {
        let url = format!("{}/beatmapsets/{mapset_id}", self.base_url);
        self.fetcher.get_json(&url, Some(token), self.timeout).await
    }

    /// Fetch all of a user's scores on one beatmap.
    pub async fn get_user_scores(
        &self,
        map_id: u64,
        user_id: &str,
        token: &str,
    ) -> Result<Value, FetchError> {
        let url = format!("{}/beatmaps/{map_id}/scores/users/{user_id}/all", self.base_url);
        self.fetcher.get_json(&url, Some(token), self.timeout).await
    }

    /// Fetch one beatmap's detail payload (carries the authenticated user's
    /// own play count).
    pub async fn get_map(&self, map_id: u64, token: &str) -> Result<Value, FetchError> {
        let url = format!("{}/beatmaps/{map_id}", self.base_url);
        self.fetcher.get_json(&url, Some(token), self.timeout).await
    }
}

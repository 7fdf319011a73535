//! Error types for the osu! API client.

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-retryable HTTP status (anything outside 2xx and the transient
    /// set). Surfaced immediately, without retries.
    #[error("{url} returned non-retryable status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    /// The retry budget ran out; `last_cause` is the final transient failure.
    #[error("{url} still failing after {attempts} attempts: {last_cause}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_cause: String,
    },
    #[error("failed to parse response body from {url}")]
    Parse {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    /// Connection-level failure that is not eligible for retry (e.g. a
    /// malformed request or TLS setup problem).
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("not authenticated: no stored credential (run `otosync auth --code <CODE>` first)")]
    NotAuthenticated,
    #[error("OSU_REDIRECT_URI must be set for the authorization-code exchange")]
    MissingRedirectUri,
    #[error("token exchange failed with status {status}: {body}")]
    Exchange { status: u16, body: String },
    #[error("malformed token response")]
    MalformedResponse(#[source] anyhow::Error),
    #[error("token request failed")]
    Request(#[from] reqwest::Error),
    #[error("credential file error")]
    Io(#[from] std::io::Error),
    #[error("stored credential file is corrupt")]
    Corrupt(#[source] serde_json::Error),
    #[error("failed to encode credentials")]
    Encode(#[source] serde_json::Error),
}

//! Bounded-retry HTTP fetch.

use super::errors::FetchError;
use super::json::parse_with_path;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Statuses worth retrying: rate limiting and transient server failures.
const TRANSIENT_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `failures` consecutive failures:
    /// `base * 2^(failures-1)`, capped.
    fn delay_after(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(1u32 << exp);
        delay.min(self.backoff_cap)
    }
}

/// HTTP GET with bounded retry on transient failures.
///
/// Holds no state between calls beyond the client's connection pool; each
/// call carries its own timeout, and a timeout counts as a transient
/// failure.
pub struct Fetcher {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(policy: RetryPolicy) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            policy,
        })
    }

    pub async fn get(
        &self,
        url: &str,
        bearer: Option<&str>,
        timeout: Duration,
    ) -> Result<reqwest::Response, FetchError> {
        let mut last_cause = String::new();

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.delay_after(attempt - 1)).await;
            }

            let mut request = self
                .http
                .get(url)
                .header(ACCEPT, "application/json")
                .timeout(timeout);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        if attempt > 1 {
                            debug!(url, attempt, "request succeeded after retries");
                        }
                        return Ok(resp);
                    }
                    if !TRANSIENT_STATUSES.contains(&status) {
                        return Err(FetchError::Status {
                            url: url.to_owned(),
                            status,
                        });
                    }
                    debug!(url, %status, attempt, "transient status, will retry");
                    last_cause = format!("status {status}");
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    debug!(url, attempt, error = %e, "connection failure, will retry");
                    last_cause = e.to_string();
                }
                Err(e) => {
                    return Err(FetchError::Transport {
                        url: url.to_owned(),
                        source: e,
                    });
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_owned(),
            attempts: self.policy.max_attempts,
            last_cause,
        })
    }

    /// GET and parse the body as JSON.
    pub async fn get_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let resp = self.get(url, bearer, timeout).await?;
        let body = resp.text().await.map_err(|e| FetchError::Transport {
            url: url.to_owned(),
            source: e,
        })?;
        parse_with_path(&body).map_err(|e| FetchError::Parse {
            url: url.to_owned(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal scripted HTTP server: serves `responses` in order, one per
    /// connection, and counts connections.
    async fn spawn_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handle = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let i = hits_handle.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses.get(i).copied().unwrap_or((200, "{}"));
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len(),
                );
                let _ = sock.write_all(resp.as_bytes()).await;
            }
        });

        (format!("http://{addr}/"), hits)
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn transient_statuses_retry_until_success() {
        let (url, hits) = spawn_server(vec![
            (503, "{}"),
            (503, "{}"),
            (503, "{}"),
            (200, r#"{"ok": true}"#),
        ])
        .await;

        let fetcher = Fetcher::new(fast_policy(10)).unwrap();
        let body = fetcher
            .get_json(&url, None, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(body["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_on_first_attempt() {
        let (url, hits) = spawn_server(vec![(404, "{}")]).await;

        let fetcher = Fetcher::new(fast_policy(10)).unwrap();
        let err = fetcher
            .get(&url, None, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Status { status, .. } if status == StatusCode::NOT_FOUND
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_the_budget_reports_the_last_cause() {
        let (url, hits) = spawn_server(vec![(503, "{}"), (503, "{}"), (503, "{}")]).await;

        let fetcher = Fetcher::new(fast_policy(3)).unwrap();
        let err = fetcher
            .get(&url, None, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::Exhausted { attempts: 3, ref last_cause, .. } if last_cause.contains("503")
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(9), Duration::from_millis(500));
    }
}

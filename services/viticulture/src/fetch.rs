//! Resilient fetcher - bounded retry with fixed backoff
//!
//! Only GET is issued, so every attempt is idempotent. Retries happen for
//! the configured transient statuses and for connect/timeout errors; any
//! other non-2xx status ends the fetch immediately.

use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;

pub const USER_AGENT: &str = "VitiBrasilHarvester/0.1 (coleta de estatisticas publicas)";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status} after {attempts} attempt(s)")]
    Status { url: String, status: u16, attempts: u32 },

    #[error("GET {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    pub backoff: Duration,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(10),
            retry_statuses: vec![500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }

    pub fn should_retry_transport(&self, err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }
}

/// A downloaded page or file, before any parsing.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub url: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub content_hash: String,
}

impl RawPayload {
    pub fn new(url: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let content_hash = format!("sha256:{:x}", hasher.finalize());
        Self {
            url: url.to_string(),
            content_type: content_type.to_string(),
            bytes,
            content_hash,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    rate_limit: Duration,
}

impl Fetcher {
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            policy: config.retry_policy(),
            rate_limit: Duration::from_millis(config.rate_limit_ms),
        })
    }

    pub fn new(client: reqwest::Client, policy: RetryPolicy, rate_limit: Duration) -> Self {
        Self {
            client,
            policy,
            rate_limit,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch(&self, url: &str) -> Result<RawPayload, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if !self.rate_limit.is_zero() {
                sleep(self.rate_limit).await;
            }

            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if resp.status().is_success() {
                        let content_type = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("application/octet-stream")
                            .to_string();
                        match resp.bytes().await {
                            Ok(bytes) => {
                                info!(url, attempt, status, bytes = bytes.len(), "fetch succeeded");
                                return Ok(RawPayload::new(url, &content_type, bytes.to_vec()));
                            }
                            Err(e) => {
                                // Body errors follow the same rules as send errors.
                                let retryable = self.policy.should_retry_transport(&e);
                                warn!(url, attempt, status, error = %e, retryable, "body read failed");
                                if !retryable || attempt >= self.policy.max_attempts {
                                    return Err(FetchError::Transport {
                                        url: url.to_string(),
                                        attempts: attempt,
                                        source: e,
                                    });
                                }
                            }
                        }
                        sleep(self.policy.backoff).await;
                        continue;
                    }

                    let retryable = self.policy.should_retry_status(status);
                    warn!(url, attempt, status, retryable, "fetch failed");
                    if !retryable || attempt >= self.policy.max_attempts {
                        return Err(FetchError::Status {
                            url: url.to_string(),
                            status,
                            attempts: attempt,
                        });
                    }
                }
                Err(e) => {
                    let retryable = self.policy.should_retry_transport(&e);
                    warn!(url, attempt, error = %e, retryable, "fetch failed");
                    if !retryable || attempt >= self.policy.max_attempts {
                        return Err(FetchError::Transport {
                            url: url.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                }
            }

            sleep(self.policy.backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response per connection, then stops listening.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: text/html; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/index.php?opcao=opt_02", addr), hits)
    }

    fn fast_fetcher(max_attempts: u32) -> Fetcher {
        Fetcher::new(
            reqwest::Client::builder().no_proxy().build().unwrap(),
            RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(5),
                retry_statuses: vec![500, 502, 503, 504],
            },
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let (url, hits) = serve(vec![(200, "<html>ok</html>")]).await;
        let payload = fast_fetcher(3).fetch(&url).await.unwrap();
        assert_eq!(payload.bytes, b"<html>ok</html>");
        assert!(payload.content_type.starts_with("text/html"));
        assert!(payload.content_hash.starts_with("sha256:"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_status_then_succeeds() {
        let (url, hits) = serve(vec![(503, ""), (502, ""), (200, "done")]).await;
        let payload = fast_fetcher(3).fetch(&url).await.unwrap();
        assert_eq!(payload.bytes, b"done");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let (url, hits) = serve(vec![(500, ""), (500, ""), (500, ""), (200, "late")]).await;
        let err = fast_fetcher(3).fetch(&url).await.unwrap_err();
        match err {
            FetchError::Status { status, attempts, .. } => {
                assert_eq!(status, 500);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_terminal() {
        let (url, hits) = serve(vec![(404, ""), (200, "never")]).await;
        let err = fast_fetcher(3).fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, attempts: 1, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_body_timeout_is_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for stall in [true, false] {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                if stall {
                    // Headers promise a body that never arrives before the client timeout.
                    let head = "HTTP/1.1 200 OK\r\ncontent-length: 100\r\nconnection: close\r\n\r\npartial";
                    let _ = socket.write_all(head.as_bytes()).await;
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        drop(socket);
                    });
                } else {
                    let ok = "HTTP/1.1 200 OK\r\ncontent-length: 4\r\nconnection: close\r\n\r\ndone";
                    let _ = socket.write_all(ok.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            }
        });

        let fetcher = Fetcher::new(
            reqwest::Client::builder()
                .no_proxy()
                .timeout(Duration::from_millis(300))
                .build()
                .unwrap(),
            RetryPolicy {
                max_attempts: 2,
                backoff: Duration::from_millis(5),
                retry_statuses: vec![503],
            },
            Duration::ZERO,
        );
        let payload = fetcher.fetch(&format!("http://{}/download/Producao.csv", addr)).await.unwrap();
        assert_eq!(payload.bytes, b"done");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_status_set() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry_status(503));
        assert!(!policy.should_retry_status(404));
        assert!(!policy.should_retry_status(501));
    }

    #[test]
    fn test_payload_hash_is_deterministic() {
        let a = RawPayload::new("u", "text/csv", b"a;b".to_vec());
        let b = RawPayload::new("u", "text/csv", b"a;b".to_vec());
        assert_eq!(a.content_hash, b.content_hash);
    }
}

// Resilient HTTP transport.
//
// Every cloud call goes through `ResilientTransport::send`: a circuit-breaker
// gate, bounded retry with stepped backoff for transient failures, a
// per-call timeout, and bearer attachment with a single forced refresh when
// the service answers 401.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::TokenSource;
use crate::circuit::{CircuitBreaker, CircuitPosition};
use crate::error::Error;

/// Shared transport configuration for building and driving HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-call timeout.
    pub timeout: Duration,
    /// How many times a transient failure is retried before giving up.
    pub max_transient_retries: u32,
    /// Delay before retry N (0-based). The last entry repeats.
    pub retry_delays: Vec<Duration>,
    /// Consecutive failed calls before the breaker opens.
    pub breaker_threshold: u32,
    /// How long an open breaker fails fast.
    pub breaker_cooldown: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_transient_retries: 3,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
            ],
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
            user_agent: concat!("quebridge/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| Error::ClientBuild(e.to_string()))
    }

    /// Backoff before retry `attempt` (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt).unwrap_or(usize::MAX);
        self.retry_delays
            .get(index)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or(Duration::from_secs(1))
    }
}

// ── ResilientTransport ──────────────────────────────────────────────

/// HTTP client wrapper applying timeout, retry, circuit breaking, and
/// 401 refresh-and-retry-once to every request.
#[derive(Debug)]
pub struct ResilientTransport {
    http: reqwest::Client,
    config: TransportConfig,
    breaker: CircuitBreaker,
}

impl ResilientTransport {
    pub fn new(config: TransportConfig) -> Result<Self, Error> {
        let http = config.build_client()?;
        Ok(Self::with_client(http, config))
    }

    /// Create a transport around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, config: TransportConfig) -> Self {
        let breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown);
        Self {
            http,
            config,
            breaker,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn circuit_position(&self) -> CircuitPosition {
        self.breaker.position()
    }

    /// Issue a request built by `build`, returning the successful response.
    ///
    /// `build` is called once per attempt so every retry sends a fresh
    /// request. With a token source, the current bearer is attached; a 401
    /// triggers exactly one forced refresh and one retry, and a second 401
    /// is returned as [`Error::Unauthorized`].
    pub async fn send<F>(
        &self,
        build: F,
        auth: Option<&dyn TokenSource>,
    ) -> Result<reqwest::Response, Error>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut token = match auth {
            Some(source) => Some(source.bearer().await.ok_or(Error::NoToken)?),
            None => None,
        };
        let mut refreshed = false;

        loop {
            let result = self.send_with_retry(&build, token.as_ref()).await;
            match (result, auth) {
                (Err(Error::Unauthorized), Some(source)) if !refreshed => {
                    debug!("401 received, forcing a token refresh before retrying once");
                    refreshed = true;
                    token = Some(source.force_refresh().await.ok_or(Error::Unauthorized)?);
                }
                (result, _) => return result,
            }
        }
    }

    /// Send and decode a JSON body, keeping the raw text on decode failure.
    pub async fn send_json<T, F>(&self, build: F, auth: Option<&dyn TokenSource>) -> Result<T, Error>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let resp = self.send(build, auth).await?;
        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    async fn send_with_retry<F>(
        &self,
        build: &F,
        token: Option<&SecretString>,
    ) -> Result<reqwest::Response, Error>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        self.breaker.check()?;

        let mut attempt = 0;
        loop {
            match self.send_once(build, token).await {
                Ok(resp) => {
                    self.breaker.record_success();
                    return Ok(resp);
                }
                Err(e) if e.is_transient() => {
                    if attempt < self.config.max_transient_retries {
                        let delay = self.config.retry_delay(attempt);
                        attempt += 1;
                        debug!(
                            attempt,
                            delay_secs = delay.as_secs_f64(),
                            error = %e,
                            "transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.breaker.record_failure();
                    return Err(e);
                }
                Err(e) => {
                    // The service answered; only transient failures trip the breaker.
                    self.breaker.record_success();
                    return Err(e);
                }
            }
        }
    }

    async fn send_once<F>(
        &self,
        build: &F,
        token: Option<&SecretString>,
    ) -> Result<reqwest::Response, Error>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut request = build(&self.http).timeout(self.config.timeout);
        if let Some(token) = token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_secs: self.config.timeout.as_secs(),
                }
            } else {
                Error::Transport(e)
            }
        })?;

        let status = resp.status();
        debug!(status = status.as_u16(), url = %resp.url(), "cloud response");
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 => Error::Unauthorized,
            400 => Error::BadRequest { message },
            404 => Error::NotFound { message },
            status => Error::Status { status, message },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_repeats_last_step() {
        let config = TransportConfig::default();
        assert_eq!(config.retry_delay(0), Duration::from_secs(1));
        assert_eq!(config.retry_delay(1), Duration::from_secs(5));
        assert_eq!(config.retry_delay(2), Duration::from_secs(15));
        assert_eq!(config.retry_delay(7), Duration::from_secs(15));
    }

    #[test]
    fn retry_delay_without_steps_falls_back_to_one_second() {
        let config = TransportConfig {
            retry_delays: Vec::new(),
            ..TransportConfig::default()
        };
        assert_eq!(config.retry_delay(0), Duration::from_secs(1));
    }
}

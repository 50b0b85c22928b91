//! Blocking JSON-over-HTTP client shared by every data provider.
//!
//! - Blocking client using `ureq` (no async); calls run on the caller's thread.
//! - Transport errors, HTTP 429 and 5xx are retried with exponential backoff.
//! - Decoding goes through `serde_path_to_error` so schema drift names the field.

use http::StatusCode;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

const USER_AGENT: &str = concat!("covers-forecast/", env!("CARGO_PKG_VERSION"));
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {message}")]
    Http { status: StatusCode, message: String },
    #[error("json error at `{path}`: {message}")]
    Decode { path: String, message: String },
    #[error("unexpected response: {0}")]
    Unexpected(String),
    #[error("provider disabled: {0}")]
    Disabled(&'static str),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Delay before retry number `attempt` (1-based): `base · 2^(attempt-1)`, capped.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.checked_mul(factor).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    /// Total attempts per request, the first one included.
    pub max_attempts: NonZeroU32,
    pub backoff: Duration,
}

#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    settings: HttpSettings,
}

impl HttpClient {
    pub fn new(settings: HttpSettings) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(settings.timeout))
            .http_status_as_error(false)
            .build();
        HttpClient {
            agent: ureq::Agent::new_with_config(config),
            settings,
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, ProviderError> {
        let body = self.execute(url, || {
            let mut req = self
                .agent
                .get(url)
                .header("Accept", "application/json")
                .header("User-Agent", USER_AGENT);
            for (k, v) in query {
                req = req.query(*k, v);
            }
            req.call()
        })?;
        decode(&body)
    }

    /// Secrets go in `headers` so they never show up in a logged URL.
    pub fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        payload: &B,
    ) -> Result<T, ProviderError> {
        let body = self.execute(url, || {
            let mut req = self
                .agent
                .post(url)
                .header("Accept", "application/json")
                .header("User-Agent", USER_AGENT);
            for (k, v) in headers {
                req = req.header(*k, *v);
            }
            req.send_json(payload)
        })?;
        decode(&body)
    }

    fn execute<F>(&self, url: &str, mut send: F) -> Result<String, ProviderError>
    where
        F: FnMut() -> Result<http::Response<ureq::Body>, ureq::Error>,
    {
        let max_attempts = self.settings.max_attempts.get();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match send() {
                Ok(mut res) if res.status().is_success() => {
                    return res
                        .body_mut()
                        .read_to_string()
                        .map_err(|e| ProviderError::Transport(e.to_string()));
                }
                Ok(mut res) => {
                    let status = res.status();
                    let mut message = res
                        .body_mut()
                        .read_to_string()
                        .unwrap_or_else(|_| String::from("<no body>"));
                    if message.len() > ERROR_BODY_LIMIT {
                        let mut cut = ERROR_BODY_LIMIT;
                        while !message.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        message.truncate(cut);
                    }
                    ProviderError::Http { status, message }
                }
                Err(e) => ProviderError::Transport(e.to_string()),
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }
            let delay = backoff_delay(self.settings.backoff, attempt);
            debug!(
                "HTTP: {} failed (attempt {}/{}): {}; retrying in {}ms",
                strip_query(url),
                attempt,
                max_attempts,
                err,
                delay.as_millis()
            );
            thread::sleep(delay);
        }
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    let mut de = serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(&mut de).map_err(|e| ProviderError::Decode {
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })
}

/// Keeps API keys out of logs.
fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{HarvestError, is_retryable_status};

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn ensure_success(self, url: &str) -> Result<Self, HarvestError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(HarvestError::HttpStatus {
            url: url.to_string(),
            status: self.status,
        })
    }
}

/// One outbound GET. Implementations make a single attempt; retries are the
/// caller's business through [`RetryPolicy`].
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, HarvestError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .default_headers(default_headers()?)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::Http {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, HarvestError> {
        debug!(url, "http.request");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| classify_error(url, &err))?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| classify_error(url, &err))?;
        debug!(url, status, "http.response");
        Ok(HttpResponse { status, body })
    }
}

pub fn default_headers() -> Result<HeaderMap, HarvestError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("px-harvest/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| HarvestError::InvalidConfig(err.to_string()))?,
    );
    Ok(headers)
}

fn classify_error(url: &str, err: &reqwest::Error) -> HarvestError {
    if err.is_timeout() {
        return HarvestError::Timeout {
            url: url.to_string(),
        };
    }
    // A body cut off mid-read is a dropped connection, not a bad response.
    if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
        return HarvestError::Connection {
            url: url.to_string(),
            message: err.to_string(),
        };
    }
    HarvestError::Http {
        url: url.to_string(),
        message: err.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Issues `url` until it succeeds, fails permanently, or `max_attempts`
    /// transient failures have been seen. Non-retryable statuses are handed
    /// back to the caller untouched.
    pub fn send<T: Transport + ?Sized>(
        &self,
        transport: &T,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<HttpResponse, HarvestError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(HarvestError::Interrupted);
            }
            attempt += 1;
            let failure = match transport.get(url) {
                Ok(response) if is_retryable_status(response.status) => HarvestError::HttpStatus {
                    url: url.to_string(),
                    status: response.status,
                },
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };
            if attempt >= attempts {
                return Err(failure);
            }
            debug!(url, attempt, error = %failure, "http.retry");
            if !cancel.sleep(self.base_delay * attempt) {
                return Err(HarvestError::Interrupted);
            }
        }
    }
}

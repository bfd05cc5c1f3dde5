use std::{collections::BTreeMap, future::Future, time::Duration};

use reqwest::{
    self,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Whether a failed request may succeed if the caller tries again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// Custom error type for requests to the provider.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error requesting {url}: {message}")]
    Network { url: String, message: String },
    #[error("Request to {url} blocked by provider: HTTP {status}")]
    Blocked {
        url: String,
        status: u16,
        class: FailureClass,
    },
    #[error("HTTP error: {url} returned {status}. Response body: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
        class: FailureClass,
    },
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
    #[error("Could not build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::Network { .. } => FailureClass::Transient,
            FetchError::Blocked { class, .. } | FetchError::Status { class, .. } => *class,
            FetchError::InvalidUrl(_) | FetchError::Client(_) => FailureClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// HTTP status of the failed response, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Blocked { status, .. } | FetchError::Status { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Classification of non-success HTTP statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPolicy {
    /// Statuses a caller may retry.
    pub transient: Vec<u16>,
    /// Statuses the provider answers with when it refuses the session.
    pub blocked: Vec<u16>,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            transient: vec![408, 429, 500, 502, 503, 504],
            blocked: vec![401, 403, 429],
        }
    }
}

impl StatusPolicy {
    pub fn classify(&self, status: u16) -> FailureClass {
        if self.transient.contains(&status) {
            FailureClass::Transient
        } else {
            FailureClass::Permanent
        }
    }

    /// Returns `Ok` for a 2xx response and the classified error otherwise.
    pub fn check(&self, response: &HttpResponse) -> Result<(), FetchError> {
        if (200..300).contains(&response.status) {
            return Ok(());
        }
        let status = response.status;
        let class = self.classify(status);
        if self.blocked.contains(&status) {
            Err(FetchError::Blocked {
                url: response.url.clone(),
                status,
                class,
            })
        } else {
            Err(FetchError::Status {
                url: response.url.clone(),
                status,
                body: response.body.clone(),
                class,
            })
        }
    }
}

/// Client settings that are not headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_verify_tls() -> bool {
    true
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            verify_tls: default_verify_tls(),
        }
    }
}

/// A response as seen by the fetcher: final URL, status and body text.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// The single operation the fetcher needs from an HTTP layer.
///
/// Non-success statuses are returned as `Ok`; only transport failures are
/// errors here. Status classification is left to [`StatusPolicy`].
pub trait Transport {
    fn get(&self, url: &Url) -> impl Future<Output = Result<HttpResponse, FetchError>>;
}

/// A cookie-carrying HTTP session scoped to one fetch.
///
/// Cookies set by the warm-up request are replayed on the data request.
/// Dropping the session releases the cookie jar and pooled connections.
pub struct HttpSession {
    client: reqwest::Client,
}

impl HttpSession {
    pub fn open(
        headers: &BTreeMap<String, String>,
        settings: &HttpSettings,
    ) -> Result<HttpSession, FetchError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(header_map(headers)?)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(HttpSession { client })
    }
}

impl Transport for HttpSession {
    async fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| FetchError::Network {
            url: final_url.clone(),
            message: e.to_string(),
        })?;

        Ok(HttpResponse {
            url: final_url,
            status,
            body,
        })
    }
}

/// Converts configured header pairs into a reqwest header map.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| FetchError::Client(format!("header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| FetchError::Client(format!("header value for {}: {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

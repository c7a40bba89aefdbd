use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use packrestore_core::{find_restore_error, RestoreError};
use packrestore_security::CredentialService;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn put(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Put,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// The network boundary. Connection failures come back as
/// [`RestoreError::Network`]; every HTTP status, redirects included, is a
/// response.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Blocking reqwest client with automatic redirects disabled so hops can be
/// counted and validated here.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("packrestore/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(|err| RestoreError::Network {
            url: request.url.clone(),
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes().map_err(|err| RestoreError::Network {
            url: request.url.clone(),
            message: err.to_string(),
        })?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub max_tries: u32,
    pub max_redirects: usize,
    pub retry_delay: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_tries: 3,
            max_redirects: 50,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Shared HTTP front end for every feed in a session: redirects, retries,
/// credentials and a per-url request counter.
pub struct HttpSource {
    transport: Arc<dyn HttpTransport>,
    credentials: Option<Arc<CredentialService>>,
    settings: HttpSettings,
    hits: Mutex<BTreeMap<String, u64>>,
}

impl HttpSource {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: HttpSettings) -> Self {
        Self {
            transport,
            credentials: None,
            settings,
            hits: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<CredentialService>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Number of requests issued for `url` in this session.
    pub fn hit_count(&self, url: &str) -> u64 {
        self.hits
            .lock()
            .map(|hits| hits.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn hits(&self) -> BTreeMap<String, u64> {
        self.hits.lock().map(|hits| hits.clone()).unwrap_or_default()
    }

    /// Sends `request`, following redirects up to the configured ceiling and
    /// answering a 401 with credentials once.
    pub fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let origin = request.url.clone();
        let mut current = request;
        let mut hops = 0_usize;
        let mut credentials_tried = false;

        loop {
            let response = self.send_with_retries(&current)?;

            if response.is_redirect() {
                hops += 1;
                if hops > self.settings.max_redirects {
                    return Err(RestoreError::TooManyRedirects {
                        url: origin,
                        max: self.settings.max_redirects,
                    }
                    .into());
                }
                let location = response.header("location").unwrap_or_default().trim();
                let target = Url::parse(location)
                    .ok()
                    .filter(|url| matches!(url.scheme(), "http" | "https"))
                    .ok_or_else(|| RestoreError::InvalidRedirect {
                        url: current.url.clone(),
                        location: location.to_string(),
                    })?;
                debug!(from = %current.url, to = %target, status = response.status, "following redirect");
                current.url = target.to_string();
                if response.status == 303 {
                    current.method = HttpMethod::Get;
                    current.body = None;
                }
                continue;
            }

            if response.status == 401 {
                let challenge = response
                    .header("www-authenticate")
                    .unwrap_or("no challenge")
                    .to_string();
                let Some(service) = self.credentials.as_ref().filter(|_| !credentials_tried) else {
                    return Err(RestoreError::Unauthorized {
                        url: current.url.clone(),
                        challenge,
                    }
                    .into());
                };
                credentials_tried = true;
                let Some(found) = service.get_credentials(&current.url, false)? else {
                    return Err(RestoreError::Unauthorized {
                        url: current.url.clone(),
                        challenge,
                    }
                    .into());
                };
                let token = STANDARD.encode(format!("{}:{}", found.username, found.password));
                current
                    .headers
                    .retain(|(name, _)| !name.eq_ignore_ascii_case("authorization"));
                current
                    .headers
                    .push(("Authorization".to_string(), format!("Basic {token}")));
                continue;
            }

            return Ok(response);
        }
    }

    fn send_with_retries(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let tries = self.settings.max_tries.max(1);
        let mut attempt = 1;
        loop {
            self.record_hit(&request.url);
            debug!(method = request.method.as_str(), url = %request.url, attempt, "http request");
            let outcome = self.transport.send(request);
            let retryable = match &outcome {
                Ok(response) => response.status >= 500 || response.status == 408 || response.status == 429,
                Err(err) => find_restore_error(err).is_some_and(RestoreError::is_transient),
            };
            if !retryable || attempt >= tries {
                return outcome;
            }
            warn!(url = %request.url, attempt, "transient http failure, retrying");
            attempt += 1;
            if !self.settings.retry_delay.is_zero() {
                thread::sleep(self.settings.retry_delay);
            }
        }
    }

    fn record_hit(&self, url: &str) {
        if let Ok(mut hits) = self.hits.lock() {
            *hits.entry(url.to_string()).or_insert(0) += 1;
        }
    }

    /// GET returning `None` for 404; other failures become
    /// [`RestoreError::HttpStatus`].
    pub fn get_bytes(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = self.send(HttpRequest::get(url))?;
        if response.status == 404 {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(RestoreError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            }
            .into());
        }
        Ok(Some(response.body))
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let Some(body) = self.get_bytes(url)? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&body).map_err(|err| RestoreError::Protocol {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        Ok(Some(parsed))
    }

    pub fn get_text(&self, url: &str) -> Result<Option<String>> {
        let Some(body) = self.get_bytes(url)? else {
            return Ok(None);
        };
        String::from_utf8(body)
            .map(Some)
            .map_err(|err| anyhow!(RestoreError::Protocol {
                url: url.to_string(),
                message: err.to_string(),
            }))
    }
}

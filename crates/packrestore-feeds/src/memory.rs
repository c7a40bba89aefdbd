use std::sync::Mutex;

use anyhow::Result;
use packrestore_core::RestoreError;

use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// In-process stand-in for remote feeds: a route table of closures keyed by
/// method and exact url. Unknown urls answer 404; hosts marked unreachable
/// fail with a network error.
#[derive(Default)]
pub struct MemoryTransport {
    routes: Vec<(HttpMethod, String, Handler)>,
    unreachable: Vec<String>,
    log: Mutex<Vec<(HttpMethod, String)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F>(mut self, method: HttpMethod, url: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.routes.push((method, url.into(), Box::new(handler)));
        self
    }

    pub fn get_bytes(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.route(HttpMethod::Get, url, move |_| HttpResponse::ok(body.clone()))
    }

    pub fn get_status(self, url: impl Into<String>, status: u16) -> Self {
        self.route(HttpMethod::Get, url, move |_| HttpResponse::new(status))
    }

    /// Every request whose url starts with `prefix` fails to connect.
    pub fn unreachable(mut self, prefix: impl Into<String>) -> Self {
        self.unreachable.push(prefix.into());
        self
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<(HttpMethod, String)> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|(_, seen)| seen == url)
            .count()
    }
}

impl HttpTransport for MemoryTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        if let Ok(mut log) = self.log.lock() {
            log.push((request.method, request.url.clone()));
        }
        if self
            .unreachable
            .iter()
            .any(|prefix| request.url.starts_with(prefix.as_str()))
        {
            return Err(RestoreError::Network {
                url: request.url.clone(),
                message: "connection refused".to_string(),
            }
            .into());
        }

        let handler = self
            .routes
            .iter()
            .rev()
            .find(|(method, url, _)| *method == request.method && url == &request.url)
            .map(|(_, _, handler)| handler);
        Ok(match handler {
            Some(handler) => handler(request),
            None => HttpResponse::new(404),
        })
    }
}

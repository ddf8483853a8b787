use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Minimal HTTP method set needed by the source adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// HTTP request envelope used by source transport calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 30_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// URL-encoded form body with the matching content type.
    pub fn with_form(self, fields: &[(&str, &str)]) -> Self {
        let body = fields
            .iter()
            .map(|(key, value)| {
                format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
            })
            .collect::<Vec<_>>()
            .join("&");
        self.with_header("content-type", "application/x-www-form-urlencoded")
            .with_body(body)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// HTTP response envelope. Bodies are raw bytes so PDFs survive intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Lossy UTF-8 view of the body.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport-level HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
    retryable: bool,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Transport contract shared by every source adapter.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Production HTTP client backed by reqwest with a cookie store.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new(user_agent: &str) -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(user_agent)
                    .cookie_store(true)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new(concat!("fundscope/", env!("CARGO_PKG_VERSION")))
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            builder = builder.timeout(std::time::Duration::from_millis(request.timeout_ms));

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::new(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    HttpError::new(format!("connection failed: {e}"))
                } else if e.is_builder() {
                    HttpError::non_retryable(format!("invalid request: {e}"))
                } else {
                    HttpError::new(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| HttpError::new(format!("failed to read response body: {e}")))?;

            Ok(HttpResponse {
                status,
                body: body.to_vec(),
            })
        })
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Respond(HttpResponse),
    Fail(HttpError),
}

#[derive(Debug, Clone)]
struct Route {
    prefix: String,
    replies: Vec<Scripted>,
    served: usize,
}

/// Deterministic offline transport: routes requests by URL prefix to scripted
/// replies and records every request it sees. The last scripted reply of a
/// route repeats once the script is exhausted; unmatched URLs get a 404.
#[derive(Debug, Default, Clone)]
pub struct FixtureHttpClient {
    routes: Arc<Mutex<Vec<Route>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    calls: Arc<AtomicUsize>,
}

impl FixtureHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every request whose URL starts with `prefix`.
    pub fn route(self, prefix: impl Into<String>, response: HttpResponse) -> Self {
        self.script(prefix, vec![Scripted::Respond(response)])
    }

    /// Answers successive requests with `statuses` in order, then `response`.
    pub fn route_after_failures(
        self,
        prefix: impl Into<String>,
        statuses: &[u16],
        response: HttpResponse,
    ) -> Self {
        let mut replies: Vec<Scripted> = statuses
            .iter()
            .map(|status| Scripted::Respond(HttpResponse::new(*status, Vec::new())))
            .collect();
        replies.push(Scripted::Respond(response));
        self.script(prefix, replies)
    }

    /// Every request to `prefix` fails at the transport level.
    pub fn route_error(self, prefix: impl Into<String>, error: HttpError) -> Self {
        self.script(prefix, vec![Scripted::Fail(error)])
    }

    fn script(self, prefix: impl Into<String>, replies: Vec<Scripted>) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(Route {
                prefix: prefix.into(),
                replies,
                served: 0,
            });
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn reply(&self, request: &HttpRequest) -> Scripted {
        let Ok(mut routes) = self.routes.lock() else {
            return Scripted::Fail(HttpError::non_retryable("fixture routes poisoned"));
        };

        // Longest matching prefix wins so specific routes can shadow broad ones.
        let route = routes
            .iter_mut()
            .filter(|route| request.url.starts_with(&route.prefix))
            .max_by_key(|route| route.prefix.len());

        match route {
            Some(route) => {
                let index = route.served.min(route.replies.len().saturating_sub(1));
                route.served += 1;
                route
                    .replies
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| Scripted::Respond(HttpResponse::new(404, Vec::new())))
            }
            None => Scripted::Respond(HttpResponse::new(404, Vec::new())),
        }
    }
}

impl HttpClient for FixtureHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.reply(&request);
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }
            match reply {
                Scripted::Respond(response) => Ok(response),
                Scripted::Fail(error) => Err(error),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_is_url_encoded() {
        let request = HttpRequest::post("https://example.test/search")
            .with_form(&[
                ("isinCode", "LU0000000001"),
                ("informationType", "Periodic information"),
            ]);

        assert_eq!(
            request.body.as_deref(),
            Some("isinCode=LU0000000001&informationType=Periodic%20information")
        );
        assert_eq!(
            request.headers.get("content-type").map(String::as_str),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[tokio::test]
    async fn fixture_replays_failures_then_success() {
        let client = FixtureHttpClient::new().route_after_failures(
            "https://example.test/",
            &[503],
            HttpResponse::ok("done"),
        );

        let first = client
            .execute(HttpRequest::get("https://example.test/a"))
            .await
            .expect("response");
        let second = client
            .execute(HttpRequest::get("https://example.test/a"))
            .await
            .expect("response");
        let third = client
            .execute(HttpRequest::get("https://example.test/a"))
            .await
            .expect("response");

        assert_eq!(first.status, 503);
        assert_eq!(second.text(), "done");
        assert_eq!(third.text(), "done");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn fixture_prefers_longest_prefix_and_404s_unknown_urls() {
        let client = FixtureHttpClient::new()
            .route("https://example.test/", HttpResponse::ok("broad"))
            .route("https://example.test/specific", HttpResponse::ok("narrow"));

        let narrow = client
            .execute(HttpRequest::get("https://example.test/specific/x"))
            .await
            .expect("response");
        let unknown = client
            .execute(HttpRequest::get("https://other.test/"))
            .await
            .expect("response");

        assert_eq!(narrow.text(), "narrow");
        assert_eq!(unknown.status, 404);
    }
}

//! Throttled, retrying access to one upstream source.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::retry::RetryConfig;
use crate::source_policy::SourcePolicy;
use crate::throttling::{SourceThrottle, ThrottleRegistry};
use crate::{SourceError, SourceId};

#[derive(Clone)]
pub struct SourceClient {
    source: SourceId,
    http: Arc<dyn HttpClient>,
    throttle: SourceThrottle,
    retry: RetryConfig,
    user_agent: Option<String>,
    timeout_ms: u64,
}

impl SourceClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        policy: &SourcePolicy,
        throttles: &ThrottleRegistry,
    ) -> Self {
        Self {
            source: policy.source,
            http,
            throttle: throttles.for_policy(policy),
            retry: policy.retry.clone(),
            user_agent: None,
            timeout_ms: policy.request_timeout.as_millis() as u64,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Same source, same throttle, different retry discipline.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Sends `request`, waiting on the source throttle before every attempt.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, SourceError> {
        let mut request = request.with_timeout_ms(self.timeout_ms);
        if let Some(agent) = &self.user_agent {
            request = request.with_header("user-agent", agent.clone());
        }
        let label = self.source.as_str();

        self.retry
            .run(label, |attempt| {
                let request = request.clone();
                async move {
                    self.throttle.acquire().await;
                    debug!(source = label, url = %request.url, attempt, "outbound request");

                    let response = self.http.execute(request.clone()).await.map_err(|err| {
                        SourceError::unavailable(format!("{}: {}", request.url, err.message()))
                            .with_retryable(err.retryable())
                    })?;

                    match SourceError::from_status(response.status, &request.url) {
                        None => Ok(response),
                        Some(err) => {
                            let retryable = self.retry.should_retry_status(response.status);
                            Err(err.with_retryable(retryable))
                        }
                    }
                }
            })
            .await
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        Ok(self.execute(HttpRequest::get(url)).await?.body)
    }

    pub async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        Ok(self.execute(HttpRequest::get(url)).await?.text())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self.execute(HttpRequest::get(url)).await?;
        serde_json::from_slice(&response.body)
            .map_err(|err| SourceError::invalid_response(format!("{url}: invalid JSON: {err}")))
    }

    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<String, SourceError> {
        Ok(self
            .execute(HttpRequest::post(url).with_form(fields))
            .await?
            .text())
    }
}

impl std::fmt::Debug for SourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceClient")
            .field("source", &self.source)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

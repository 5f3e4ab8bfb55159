use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{RequestBuilder, Response, Url};
use serde_json::{json, Value};

use super::{extract_items, ApiError, Collaborator, ItemOperation};
use crate::filter::FilterState;
use crate::plan::PlanDraft;
use crate::record::RecordKind;

const USER_AGENT: &str = concat!("kdash/", env!("CARGO_PKG_VERSION"));

/// Exponential backoff for idempotent reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Clone, Debug)]
pub struct RestOptions {
    pub base_url: String,
    pub timeout_seconds: usize,
    pub proxy: Option<String>,
    pub header: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/".to_string(),
            timeout_seconds: 10,
            proxy: None,
            header: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    retry: RetryPolicy,
}

impl RestClient {
    pub fn new(options: &RestOptions) -> Result<Self, ApiError> {
        let base = Url::parse(options.base_url.trim()).map_err(|e| ApiError::Endpoint {
            message: format!("'{}': {e}", options.base_url),
        })?;
        if base.cannot_be_a_base() {
            return Err(ApiError::Endpoint {
                message: format!("'{}' cannot be used as a base URL", options.base_url),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(USER_AGENT),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        if let Some(raw) = options.header.as_deref().filter(|h| !h.trim().is_empty()) {
            let (name, value) = parse_header(raw)?;
            headers.insert(name, value);
        }

        let timeout = Duration::from_secs(options.timeout_seconds.try_into().unwrap_or(10));
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout);

        if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| ApiError::Setup {
                message: format!("invalid proxy '{proxy}': {e}"),
            })?;
            builder = builder.proxy(proxy);
        }

        let http = builder.build().map_err(|e| ApiError::Setup {
            message: e.to_string(),
        })?;

        Ok(Self {
            http,
            base,
            retry: options.retry,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| ApiError::Endpoint {
                message: format!("'{}' cannot be used as a base URL", self.base),
            })?;
            path.pop_if_empty();
            path.extend(["api", "v1"]);
            path.extend(segments);
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, resource: &str) -> Result<Response, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network { source: e })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status.as_u16(), resource, body))
    }

    async fn read_json(response: Response) -> Result<Value, ApiError> {
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network { source: e })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode {
            message: e.to_string(),
        })
    }

    /// GET with backoff; only reads go through here.
    async fn get_json(
        &self,
        url: Url,
        query: &[(String, String)],
        resource: &str,
    ) -> Result<Value, ApiError> {
        let mut attempt = 0u32;
        loop {
            let request = self.http.get(url.clone()).query(query);
            let result = match self.send(request, resource).await {
                Ok(response) => Self::read_json(response).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(
                        %url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying read"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), ApiError> {
    let (name, value) = raw.split_once(':').ok_or_else(|| ApiError::Setup {
        message: format!("invalid header '{raw}', expected 'Key: Value'"),
    })?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| ApiError::Setup {
        message: format!("invalid header name in '{raw}': {e}"),
    })?;
    let value = HeaderValue::from_str(value.trim()).map_err(|e| ApiError::Setup {
        message: format!("invalid header value in '{raw}': {e}"),
    })?;
    Ok((name, value))
}

fn resource(kind: RecordKind, id: &str) -> String {
    format!("{} {id}", kind.singular())
}

#[async_trait]
impl Collaborator for RestClient {
    async fn list_records(
        &self,
        kind: RecordKind,
        filters: &FilterState,
    ) -> Result<Vec<Value>, ApiError> {
        let url = self.endpoint(&[kind.path()])?;
        let query: Vec<(String, String)> = filters
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let body = self.get_json(url, &query, kind.plural()).await?;
        let items = extract_items(body, kind)?;
        tracing::debug!(kind = %kind, count = items.len(), "listed records");
        Ok(items)
    }

    async fn get_record(&self, kind: RecordKind, id: &str) -> Result<Value, ApiError> {
        let url = self.endpoint(&[kind.path(), id])?;
        self.get_json(url, &[], &resource(kind, id)).await
    }

    async fn perform_item_operation(
        &self,
        kind: RecordKind,
        op: ItemOperation,
        id: &str,
        params: Option<&Value>,
    ) -> Result<(), ApiError> {
        let what = resource(kind, id);
        let request = match op {
            ItemOperation::Execute => {
                let url = self.endpoint(&[kind.path(), id, "execute"])?;
                self.http
                    .post(url)
                    .json(params.unwrap_or(&Value::Object(Default::default())))
            }
            ItemOperation::Delete => self.http.delete(self.endpoint(&[kind.path(), id])?),
            ItemOperation::Tag => {
                let url = self.endpoint(&[kind.path(), id, "tags"])?;
                let body = params.cloned().unwrap_or_else(|| json!({"tags": []}));
                self.http.post(url).json(&body)
            }
        };
        self.send(request, &what).await?;
        tracing::debug!(kind = %kind, id, op = op.verb(), "item operation succeeded");
        Ok(())
    }

    async fn create_plan(&self, draft: &PlanDraft) -> Result<Value, ApiError> {
        let url = self.endpoint(&[RecordKind::TestPlan.path()])?;
        let response = self
            .send(self.http.post(url).json(draft), "test plan")
            .await?;
        Self::read_json(response).await
    }

    async fn update_plan(&self, id: &str, draft: &PlanDraft) -> Result<Value, ApiError> {
        let url = self.endpoint(&[RecordKind::TestPlan.path(), id])?;
        let response = self
            .send(
                self.http.put(url).json(draft),
                &resource(RecordKind::TestPlan, id),
            )
            .await?;
        Self::read_json(response).await
    }

    async fn delete_plan(&self, id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&[RecordKind::TestPlan.path(), id])?;
        self.send(self.http.delete(url), &resource(RecordKind::TestPlan, id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> RestClient {
        RestClient::new(&RestOptions {
            base_url: base.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoints_extend_the_base_path() {
        let c = client("http://localhost:8000");
        assert_eq!(
            c.endpoint(&["test-cases"]).unwrap().as_str(),
            "http://localhost:8000/api/v1/test-cases"
        );
        let c = client("https://lab.example/dash/");
        assert_eq!(
            c.endpoint(&["test-plans", "p 1", "execute"]).unwrap().as_str(),
            "https://lab.example/dash/api/v1/test-plans/p%201/execute"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        let err = RestClient::new(&RestOptions {
            base_url: "mailto:ops@example.com".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::Endpoint { .. }));
        assert!(RestClient::new(&RestOptions {
            base_url: "not a url".to_string(),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn custom_header_must_be_key_value() {
        assert!(parse_header("Authorization: Bearer abc").is_ok());
        assert!(parse_header("no-colon").is_err());
        let err = RestClient::new(&RestOptions {
            header: Some("bad header name: x".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::Setup { .. }));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(500));
        assert_eq!(p.delay_for(40), Duration::from_millis(500));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }

    #[tokio::test]
    async fn unreachable_backend_surfaces_network_error() {
        let c = RestClient::new(&RestOptions {
            base_url: "http://127.0.0.1:9/".to_string(),
            timeout_seconds: 2,
            retry: RetryPolicy::none(),
            ..Default::default()
        })
        .unwrap();
        let err = c
            .list_records(RecordKind::TestCase, &FilterState::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Network { .. }));
    }
}

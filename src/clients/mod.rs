/// External API clients module
use crate::errors::{ApiError, ApiResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

mod pager;
#[cfg(test)]
pub mod fake;

pub use pager::Pager;

/// HTTP client wrapper with common configuration
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// `None` leaves requests without a client-side deadline.
    pub fn new(timeout: Option<Duration>) -> ApiResult<Self> {
        let mut builder = Client::builder().user_agent("uptime-cache/1.0");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}

/// Paginated upstream collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Monitors,
    Incidents,
    Heartbeats,
}

impl Resource {
    pub const fn path(self) -> &'static str {
        match self {
            Resource::Monitors => "monitors",
            Resource::Incidents => "incidents",
            Resource::Heartbeats => "heartbeats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub resource: Resource,
    pub per_page: u32,
    /// Value of the previous page's `pagination.next`; `None` asks for the first page.
    pub cursor: Option<String>,
}

/// One page of a `{data: [...], pagination: {next}}` response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next: Option<String>,
}

impl Page {
    pub fn from_body(body: Value) -> Self {
        let next = body
            .pointer("/pagination/next")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let items = match body {
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                Some(single @ Value::Object(_)) => vec![single],
                _ => Vec::new(),
            },
            Value::Array(items) => items,
            _ => Vec::new(),
        };

        Self { items, next }
    }
}

/// Black-box page fetcher for the upstream API
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> ApiResult<Page>;
}

/// Bearer-authenticated client for the uptime-monitoring API
pub struct UptimeClient {
    http_client: HttpClient,
    base_url: String,
    token: String,
}

impl UptimeClient {
    pub fn new(base_url: String, token: String) -> ApiResult<Self> {
        Ok(Self {
            http_client: HttpClient::new(None)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.http_client
            .get_client()
            .get(url)
            .bearer_auth(&self.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json(&self, req: RequestBuilder) -> ApiResult<Value> {
        let resp = ensure_success(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    /// Upstream SLA report for one monitor
    pub async fn fetch_sla(
        &self,
        monitor_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> ApiResult<Value> {
        let mut req = self.get(&self.url(&format!("monitors/{}/sla", monitor_id)));
        if let Some(from) = from {
            req = req.query(&[("from", from.to_string())]);
        }
        if let Some(to) = to {
            req = req.query(&[("to", to.to_string())]);
        }
        self.get_json(req).await
    }

    /// Upstream response-time report for one monitor
    pub async fn fetch_response_times(&self, monitor_id: &str) -> ApiResult<Value> {
        let req = self.get(&self.url(&format!("monitors/{}/response-times", monitor_id)));
        self.get_json(req).await
    }
}

#[async_trait]
impl UpstreamApi for UptimeClient {
    async fn fetch_page(&self, request: &PageRequest) -> ApiResult<Page> {
        let req = match request.cursor.as_deref() {
            Some(next) if next.starts_with("http://") || next.starts_with("https://") => {
                self.get(next)
            }
            Some(page) => self.get(&self.url(request.resource.path())).query(&[
                ("page", page.to_string()),
                ("per_page", request.per_page.to_string()),
            ]),
            None => self
                .get(&self.url(request.resource.path()))
                .query(&[("per_page", request.per_page.to_string())]),
        };

        let body = self.get_json(req).await?;
        Ok(Page::from_body(body))
    }
}

/// Result of an ad-hoc proxied GET
#[derive(Debug, Serialize)]
pub struct ProxiedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Plain GET of arbitrary http(s) URLs, bounded by a timeout
pub struct ProxyClient {
    http_client: HttpClient,
}

impl ProxyClient {
    pub fn new(timeout: Duration) -> ApiResult<Self> {
        Ok(Self {
            http_client: HttpClient::new(Some(timeout))?,
        })
    }

    pub async fn fetch(&self, url: &str) -> ApiResult<ProxiedResponse> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ApiError::InvalidInput(format!("bad url {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidInput(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let resp = self.http_client.get_client().get(parsed).send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await?;

        Ok(ProxiedResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Turn a non-2xx response into `ApiError::Upstream`, keeping a short body excerpt
async fn ensure_success(resp: Response) -> ApiResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut message = resp.text().await.unwrap_or_default();
    if message.len() > 200 {
        let cut = (0..=200).rev().find(|i| message.is_char_boundary(*i)).unwrap_or(0);
        message.truncate(cut);
    }
    if message.is_empty() {
        message = status.canonical_reason().unwrap_or("request failed").to_string();
    }
    Err(ApiError::Upstream {
        status: status.as_u16(),
        message,
    })
}

/// Business logic services layer
use crate::clients::{Pager, ProxiedResponse, ProxyClient, Resource, UptimeClient};
use crate::errors::ApiResult;
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;

mod aggregator;
mod dashboard;
mod heatmap;
mod refresh;

pub use refresh::{RefreshOutcome, RefreshService};

/// Upstream passthrough calls that bypass the cache
pub struct PassthroughService {
    client: Arc<UptimeClient>,
    proxy: ProxyClient,
    page_size: u32,
    page_cap: u32,
}

impl PassthroughService {
    pub fn new(client: Arc<UptimeClient>, proxy: ProxyClient, page_size: u32, page_cap: u32) -> Self {
        Self {
            client,
            proxy,
            page_size,
            page_cap,
        }
    }

    pub async fn sla(
        &self,
        monitor_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> ApiResult<Value> {
        self.client.fetch_sla(monitor_id, from, to).await
    }

    pub async fn response_times(&self, monitor_id: &str) -> ApiResult<Value> {
        self.client.fetch_response_times(monitor_id).await
    }

    /// Heartbeats, paged with the same cap as incidents
    pub async fn heartbeats(&self) -> ApiResult<Vec<Value>> {
        Pager::new(&*self.client, Resource::Heartbeats, self.page_size)
            .max_pages(self.page_cap)
            .collect_all()
            .await
    }

    pub async fn proxy(&self, url: &str) -> ApiResult<ProxiedResponse> {
        self.proxy.fetch(url).await
    }
}

use super::{PageRequest, Resource, UpstreamApi};
use crate::errors::ApiResult;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Lazily walks one upstream collection page by page.
///
/// Each `next_page` call is one round trip. The walk ends when a page carries no
/// `next` cursor, when the page cap is hit, or after the first error.
pub struct Pager<'a> {
    upstream: &'a dyn UpstreamApi,
    resource: Resource,
    per_page: u32,
    max_pages: Option<u32>,
    delay: Duration,
    cursor: Option<String>,
    pages_fetched: u32,
    done: bool,
}

impl<'a> Pager<'a> {
    pub fn new(upstream: &'a dyn UpstreamApi, resource: Resource, per_page: u32) -> Self {
        Self {
            upstream,
            resource,
            per_page,
            max_pages: None,
            delay: Duration::ZERO,
            cursor: None,
            pages_fetched: 0,
            done: false,
        }
    }

    pub fn max_pages(mut self, cap: u32) -> Self {
        self.max_pages = Some(cap);
        self
    }

    /// Pause inserted before every page after the first.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn has_more(&self) -> bool {
        !self.done
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub async fn next_page(&mut self) -> ApiResult<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        if self.max_pages == Some(0) {
            self.done = true;
            return Ok(None);
        }
        if self.pages_fetched > 0 && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let request = PageRequest {
            resource: self.resource,
            per_page: self.per_page,
            cursor: self.cursor.take(),
        };
        let page = match self.upstream.fetch_page(&request).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        self.pages_fetched += 1;

        debug!(
            resource = self.resource.path(),
            page = self.pages_fetched,
            items = page.items.len(),
            "fetched upstream page"
        );

        match page.next {
            None => self.done = true,
            Some(_) if Some(self.pages_fetched) == self.max_pages => {
                debug!(
                    resource = self.resource.path(),
                    cap = self.pages_fetched,
                    "page cap reached, stopping"
                );
                self.done = true;
            }
            Some(next) => self.cursor = Some(next),
        }

        Ok(Some(page.items))
    }

    /// Drain the remaining pages into one vector.
    pub async fn collect_all(mut self) -> ApiResult<Vec<Value>> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_page().await? {
            all.extend(batch);
        }
        Ok(all)
    }
}

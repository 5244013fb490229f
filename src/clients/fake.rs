//! Scripted upstream for tests. Cursors are page indexes.
use super::{Page, PageRequest, Resource, UpstreamApi};
use crate::errors::{ApiError, ApiResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

#[derive(Default)]
struct Script {
    pages: Vec<Vec<Value>>,
    fail_at: Option<(usize, u16)>,
}

#[derive(Default)]
pub struct ScriptedUpstream {
    scripts: Mutex<HashMap<Resource, Script>>,
    calls: Mutex<HashMap<Resource, usize>>,
    gate: Mutex<Option<(Resource, Arc<Semaphore>)>>,
    pub entered: Notify,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pages(&self, resource: Resource, pages: Vec<Vec<Value>>) {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.entry(resource).or_default();
        script.pages = pages;
        script.fail_at = None;
    }

    /// Make the `index`-th page (0-based) of `resource` answer with `status`.
    pub fn fail_at(&self, resource: Resource, index: usize, status: u16) {
        self.scripts
            .lock()
            .unwrap()
            .entry(resource)
            .or_default()
            .fail_at = Some((index, status));
    }

    /// Block every fetch of `resource` until the returned semaphore gets permits.
    pub fn hold(&self, resource: Resource) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some((resource, gate.clone()));
        gate
    }

    pub fn calls(&self, resource: Resource) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&resource)
            .copied()
            .unwrap_or(0)
    }
}

/// Upstream-shaped monitor item
pub fn monitor_item(id: &str, name: &str, status: &str) -> Value {
    json!({
        "id": id,
        "type": "monitor",
        "attributes": {
            "url": format!("https://{}.example.com", id),
            "pronounceable_name": name,
            "status": status
        }
    })
}

/// Upstream-shaped incident item
pub fn incident_item(id: &str, monitor_id: &str) -> Value {
    json!({
        "id": id,
        "type": "incident",
        "attributes": {"name": monitor_id, "cause": "Status 500", "started_at": "2024-01-15T10:30:00Z"},
        "relationships": {"monitor": {"data": {"id": monitor_id, "type": "monitor"}}}
    })
}

#[async_trait]
impl UpstreamApi for ScriptedUpstream {
    async fn fetch_page(&self, request: &PageRequest) -> ApiResult<Page> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.resource)
            .or_default() += 1;
        self.entered.notify_one();

        let gate = self
            .gate
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(r, _)| *r == request.resource)
            .map(|(_, g)| g.clone());
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let index: usize = request
            .cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);

        let scripts = self.scripts.lock().unwrap();
        let script = match scripts.get(&request.resource) {
            Some(script) => script,
            None => return Ok(Page::default()),
        };
        if let Some((at, status)) = script.fail_at {
            if at == index {
                return Err(ApiError::Upstream {
                    status,
                    message: "scripted failure".into(),
                });
            }
        }

        let items = script.pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < script.pages.len()).then(|| (index + 1).to_string());
        Ok(Page { items, next })
    }
}

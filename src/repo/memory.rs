use super::{AggregatesByMonitor, Collection, Record, Store};
use crate::domain::{DailyAggregate, MonitorStatus};
use crate::errors::ApiResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    collections: HashMap<Collection, BTreeMap<String, Value>>,
    aggregates: BTreeMap<(String, NaiveDate), DailyAggregate>,
    metadata: HashMap<String, String>,
}

/// Process-local store. Every operation holds the one lock for its whole duration.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_many(&self, collection: Collection, records: Vec<Record>) -> ApiResult<()> {
        let mut inner = self.inner.lock().await;
        let rows = inner.collections.entry(collection).or_default();
        for record in records {
            rows.insert(record.id, record.payload);
        }
        Ok(())
    }

    async fn replace_all(&self, collection: Collection, records: Vec<Record>) -> ApiResult<()> {
        let fresh: BTreeMap<String, Value> = records
            .into_iter()
            .map(|r| (r.id, r.payload))
            .collect();
        self.inner.lock().await.collections.insert(collection, fresh);
        Ok(())
    }

    async fn get_all(&self, collection: Collection) -> ApiResult<Vec<Record>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .collections
            .get(&collection)
            .map(|rows| {
                rows.iter()
                    .map(|(id, payload)| Record {
                        id: id.clone(),
                        payload: payload.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn merge_daily_aggregate(
        &self,
        monitor_id: &str,
        day: NaiveDate,
        sample: MonitorStatus,
        failed: bool,
    ) -> ApiResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .aggregates
            .entry((monitor_id.to_string(), day))
            .and_modify(|row| row.absorb(sample, failed))
            .or_insert_with(|| DailyAggregate::first_sample(monitor_id, day, sample, failed));
        Ok(())
    }

    async fn init_daily_aggregate(
        &self,
        monitor_id: &str,
        day: NaiveDate,
        sample: MonitorStatus,
    ) -> ApiResult<bool> {
        let mut inner = self.inner.lock().await;
        let key = (monitor_id.to_string(), day);
        if inner.aggregates.contains_key(&key) {
            return Ok(false);
        }
        inner
            .aggregates
            .insert(key, DailyAggregate::empty(monitor_id, day, sample));
        Ok(true)
    }

    async fn get_daily_aggregates(&self, since: NaiveDate) -> ApiResult<AggregatesByMonitor> {
        let inner = self.inner.lock().await;
        let mut grouped = AggregatesByMonitor::new();
        // BTreeMap keys are (monitor, day), so each group comes out day-ordered
        for ((monitor_id, day), row) in inner.aggregates.iter() {
            if *day >= since {
                grouped
                    .entry(monitor_id.clone())
                    .or_default()
                    .push(row.clone());
            }
        }
        Ok(grouped)
    }

    async fn get_metadata(&self, key: &str) -> ApiResult<Option<String>> {
        Ok(self.inner.lock().await.metadata.get(key).cloned())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> ApiResult<()> {
        self.inner
            .lock()
            .await
            .metadata
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

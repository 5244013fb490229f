/// Repository layer for durable state
use crate::domain::{DailyAggregate, IncidentSnapshot, MonitorSnapshot, MonitorStatus, StatusChangeSnapshot};
use crate::errors::ApiResult;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{init_db, PgStore};

/// Metadata key holding the RFC 3339 time of the last completed refresh
pub const LAST_UPDATED_KEY: &str = "last_updated";

/// Replace-on-write snapshot collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Monitors,
    Incidents,
    StatusChanges,
}

impl Collection {
    pub const fn table(self) -> &'static str {
        match self {
            Collection::Monitors => "monitors",
            Collection::Incidents => "incidents",
            Collection::StatusChanges => "status_changes",
        }
    }
}

/// One persisted snapshot: opaque id plus its serialized envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub payload: Value,
}

/// Daily rows grouped by monitor id, each group ordered by day
pub type AggregatesByMonitor = BTreeMap<String, Vec<DailyAggregate>>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace records by id, all in one transaction.
    async fn upsert_many(&self, collection: Collection, records: Vec<Record>) -> ApiResult<()>;

    /// Clear the collection and insert `records`. On failure the prior contents survive.
    async fn replace_all(&self, collection: Collection, records: Vec<Record>) -> ApiResult<()>;

    async fn get_all(&self, collection: Collection) -> ApiResult<Vec<Record>>;

    /// Atomically fold one observation into the (monitor, day) counters.
    async fn merge_daily_aggregate(
        &self,
        monitor_id: &str,
        day: NaiveDate,
        sample: MonitorStatus,
        failed: bool,
    ) -> ApiResult<()>;

    /// Insert a zero-counter row unless the key already exists. Returns whether a row was created.
    async fn init_daily_aggregate(
        &self,
        monitor_id: &str,
        day: NaiveDate,
        sample: MonitorStatus,
    ) -> ApiResult<bool>;

    async fn get_daily_aggregates(&self, since: NaiveDate) -> ApiResult<AggregatesByMonitor>;

    async fn get_metadata(&self, key: &str) -> ApiResult<Option<String>>;

    async fn set_metadata(&self, key: &str, value: &str) -> ApiResult<()>;
}

/// Versioned envelope every snapshot is persisted in
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub data: T,
}

/// A domain type stored as a versioned snapshot in one collection.
///
/// Bump `VERSION` when the serialized shape changes; older rows are skipped on
/// read and rewritten by the next refresh.
pub trait Snapshot: Serialize + DeserializeOwned {
    const COLLECTION: Collection;
    const VERSION: u32;

    fn record_id(&self) -> String;
}

impl Snapshot for MonitorSnapshot {
    const COLLECTION: Collection = Collection::Monitors;
    const VERSION: u32 = 1;

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

impl Snapshot for IncidentSnapshot {
    const COLLECTION: Collection = Collection::Incidents;
    const VERSION: u32 = 1;

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

impl Snapshot for StatusChangeSnapshot {
    const COLLECTION: Collection = Collection::StatusChanges;
    const VERSION: u32 = 1;

    fn record_id(&self) -> String {
        self.id.clone()
    }
}

pub fn encode<T: Snapshot>(items: &[T]) -> ApiResult<Vec<Record>> {
    items
        .iter()
        .map(|item| {
            let payload = serde_json::to_value(Envelope {
                version: T::VERSION,
                data: item,
            })?;
            Ok(Record {
                id: item.record_id(),
                payload,
            })
        })
        .collect()
}

/// Decode records of the current version; anything else is logged and skipped.
pub fn decode<T: Snapshot>(records: Vec<Record>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| {
            match serde_json::from_value::<Envelope<Value>>(record.payload) {
                Ok(env) if env.version == T::VERSION => match serde_json::from_value(env.data) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!(collection = T::COLLECTION.table(), id = %record.id, "undecodable snapshot: {}", e);
                        None
                    }
                },
                Ok(env) => {
                    warn!(
                        collection = T::COLLECTION.table(),
                        id = %record.id,
                        version = env.version,
                        "skipping snapshot with unsupported version"
                    );
                    None
                }
                Err(e) => {
                    warn!(collection = T::COLLECTION.table(), id = %record.id, "malformed snapshot envelope: {}", e);
                    None
                }
            }
        })
        .collect()
}

/// Typed convenience wrappers over a `Store`
pub async fn load<T: Snapshot>(store: &dyn Store) -> ApiResult<Vec<T>> {
    Ok(decode(store.get_all(T::COLLECTION).await?))
}

pub async fn upsert<T: Snapshot>(store: &dyn Store, items: &[T]) -> ApiResult<()> {
    store.upsert_many(T::COLLECTION, encode(items)?).await
}

pub async fn replace<T: Snapshot>(store: &dyn Store, items: &[T]) -> ApiResult<()> {
    store.replace_all(T::COLLECTION, encode(items)?).await
}

use crate::domain::MonitorStatus;
use crate::errors::ApiResult;
use crate::repo::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Turns per-cycle monitor observations into daily counter updates
#[derive(Clone)]
pub struct DailyAggregator {
    store: Arc<dyn Store>,
}

impl DailyAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Count one observation against today's (UTC) row. A "down" sample is a failed check.
    pub async fn record_observation(
        &self,
        monitor_id: &str,
        sample: MonitorStatus,
        now: DateTime<Utc>,
    ) -> ApiResult<()> {
        self.store
            .merge_daily_aggregate(monitor_id, now.date_naive(), sample, sample.is_down())
            .await
    }

    /// Seed today's row with zero counters if the key is still absent.
    pub async fn initialize_if_absent(
        &self,
        monitor_id: &str,
        sample: MonitorStatus,
        now: DateTime<Utc>,
    ) -> ApiResult<bool> {
        self.store
            .init_daily_aggregate(monitor_id, now.date_naive(), sample)
            .await
    }
}

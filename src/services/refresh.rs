use super::aggregator::DailyAggregator;
use super::dashboard::build_summary;
use super::heatmap::build_heatmap;
use crate::clients::{Pager, Resource, UpstreamApi};
use crate::config::RefreshSettings;
use crate::domain::{
    DashboardSummary, HeatmapRow, IncidentSnapshot, MonitorSnapshot, RefreshProgress,
    StatusChangeSnapshot, StatusReport,
};
use crate::errors::ApiResult;
use crate::repo::{self, Store, LAST_UPDATED_KEY};
use chrono::{DateTime, Days, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Source of "now"; swapped out in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed { monitors: usize },
    Failed,
    TimedOut,
    /// Another cycle was already in flight.
    Skipped,
}

/// Idle/Loading flag plus live progress of the cycle in flight
#[derive(Default)]
pub struct RefreshState {
    loading: AtomicBool,
    current: AtomicUsize,
    total: AtomicUsize,
}

impl RefreshState {
    /// Idle -> Loading as a single compare-and-set. `None` if a cycle already runs.
    fn try_begin(self: &Arc<Self>) -> Option<LoadingGuard> {
        self.loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.current.store(0, Ordering::Release);
        self.total.store(0, Ordering::Release);
        Some(LoadingGuard {
            state: Arc::clone(self),
        })
    }

    fn set_progress(&self, current: usize, total: usize) {
        self.current.store(current, Ordering::Release);
        self.total.store(total.max(current), Ordering::Release);
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> RefreshProgress {
        RefreshProgress {
            current: self.current.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
        }
    }
}

/// Held for the lifetime of one cycle; dropping it returns the state to Idle.
struct LoadingGuard {
    state: Arc<RefreshState>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let current = self.state.current.load(Ordering::Acquire);
        self.state.total.store(current, Ordering::Release);
        self.state.loading.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct Cache {
    monitors: Arc<Vec<MonitorSnapshot>>,
    incidents: Arc<Vec<IncidentSnapshot>>,
    last_updated: Option<DateTime<Utc>>,
}

/// Single-flight refresh of the monitor cache, the durable store and the daily aggregates
pub struct RefreshService {
    upstream: Arc<dyn UpstreamApi>,
    store: Arc<dyn Store>,
    aggregator: DailyAggregator,
    settings: RefreshSettings,
    state: Arc<RefreshState>,
    cache: RwLock<Cache>,
    clock: Clock,
}

impl RefreshService {
    pub fn new(
        upstream: Arc<dyn UpstreamApi>,
        store: Arc<dyn Store>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            upstream,
            aggregator: DailyAggregator::new(store.clone()),
            store,
            settings,
            state: Arc::new(RefreshState::default()),
            cache: RwLock::new(Cache::default()),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Load the last persisted state into memory and seed today's aggregate rows.
    pub async fn hydrate(&self) -> ApiResult<usize> {
        let monitors: Vec<MonitorSnapshot> = repo::load(self.store.as_ref()).await?;
        let incidents: Vec<IncidentSnapshot> = repo::load(self.store.as_ref()).await?;
        let last_updated = self
            .store
            .get_metadata(LAST_UPDATED_KEY)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|t| t.with_timezone(&Utc));

        let now = (self.clock)();
        let mut seeded = 0;
        for monitor in &monitors {
            match self
                .aggregator
                .initialize_if_absent(&monitor.id, monitor.status, now)
                .await
            {
                Ok(true) => seeded += 1,
                Ok(false) => {}
                Err(e) => warn!(monitor = %monitor.id, "could not seed today's aggregate: {}", e),
            }
        }

        let count = monitors.len();
        {
            let mut cache = self.cache.write().await;
            cache.monitors = Arc::new(monitors);
            cache.incidents = Arc::new(incidents);
            cache.last_updated = last_updated;
        }
        info!(monitors = count, seeded, "cache hydrated from store");
        Ok(count)
    }

    /// Start a cycle in the background unless one is already running.
    pub fn trigger(self: &Arc<Self>) -> bool {
        match self.state.try_begin() {
            Some(guard) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.run_guarded(guard).await;
                });
                true
            }
            None => {
                debug!("refresh already in flight, trigger ignored");
                false
            }
        }
    }

    /// Run a cycle inline unless one is already running.
    pub async fn refresh(&self) -> RefreshOutcome {
        match self.state.try_begin() {
            Some(guard) => self.run_guarded(guard).await,
            None => {
                debug!("refresh already in flight, skipping");
                RefreshOutcome::Skipped
            }
        }
    }

    async fn run_guarded(&self, guard: LoadingGuard) -> RefreshOutcome {
        let started = Instant::now();
        info!("refresh cycle started");

        let outcome = self.run_cycle().await;

        drop(guard);
        info!(?outcome, elapsed_ms = started.elapsed().as_millis() as u64, "refresh cycle finished");
        outcome
    }

    /// The cycle deadline bounds upstream paging only. Once the monitor cache is swapped,
    /// every fetched monitor gets its daily sample before the cycle ends.
    async fn run_cycle(&self) -> RefreshOutcome {
        let deadline = self
            .settings
            .cycle_timeout
            .map(|limit| tokio::time::Instant::now() + limit);

        let fetched = match within(deadline, self.fetch_monitors()).await {
            Some(Ok(fetched)) => fetched,
            Some(Err(e)) if e.is_upstream() => {
                warn!("upstream monitor listing failed, keeping previous cache: {}", e);
                return RefreshOutcome::Failed;
            }
            Some(Err(e)) => {
                error!("monitor listing failed, keeping previous cache: {}", e);
                return RefreshOutcome::Failed;
            }
            None => {
                error!(timeout = ?self.settings.cycle_timeout, "monitor paging timed out, keeping previous cache");
                return RefreshOutcome::TimedOut;
            }
        };

        let (monitors, now) = match self.commit_monitors(fetched).await {
            Ok(committed) => committed,
            Err(e) => {
                error!("monitor refresh failed, keeping previous cache: {}", e);
                return RefreshOutcome::Failed;
            }
        };

        self.aggregate(&monitors, now).await;

        match within(deadline, self.fetch_incidents()).await {
            Some(Ok(incidents)) => {
                if let Err(e) = self.store_incidents(incidents).await {
                    warn!("incident refresh failed: {}", e);
                }
            }
            Some(Err(e)) => warn!("incident refresh failed: {}", e),
            None => warn!(timeout = ?self.settings.cycle_timeout, "incident paging timed out, keeping previous incidents"),
        }

        RefreshOutcome::Completed {
            monitors: monitors.len(),
        }
    }

    /// Page all monitors. Nothing is persisted or visible yet.
    async fn fetch_monitors(&self) -> ApiResult<Vec<MonitorSnapshot>> {
        let per_page = self.settings.monitor_page_size;
        let mut pager = Pager::new(self.upstream.as_ref(), Resource::Monitors, per_page)
            .delay(self.settings.page_delay);

        let mut fetched: Vec<MonitorSnapshot> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut skipped = 0usize;

        while let Some(batch) = pager.next_page().await? {
            for item in &batch {
                let Some(monitor) = MonitorSnapshot::from_upstream(item) else {
                    skipped += 1;
                    continue;
                };
                // A monitor can shift across page boundaries while paging; keep one copy
                match positions.get(&monitor.id) {
                    Some(&at) => fetched[at] = monitor,
                    None => {
                        positions.insert(monitor.id.clone(), fetched.len());
                        fetched.push(monitor);
                    }
                }
            }

            let estimate = if pager.has_more() {
                fetched.len() + per_page as usize
            } else {
                fetched.len()
            };
            self.state.set_progress(fetched.len(), estimate);
        }
        if skipped > 0 {
            warn!(skipped, "upstream monitors without an id were ignored");
        }
        debug!(monitors = fetched.len(), pages = pager.pages_fetched(), "monitor listing fetched");
        Ok(fetched)
    }

    /// Persist the fetched monitors, then swap the cache and record status changes.
    async fn commit_monitors(
        &self,
        fetched: Vec<MonitorSnapshot>,
    ) -> ApiResult<(Arc<Vec<MonitorSnapshot>>, DateTime<Utc>)> {
        let now = (self.clock)();
        repo::upsert(self.store.as_ref(), &fetched).await?;
        self.store
            .set_metadata(LAST_UPDATED_KEY, &now.to_rfc3339())
            .await?;

        let fresh = Arc::new(fetched);
        let previous = {
            let mut cache = self.cache.write().await;
            cache.last_updated = Some(now);
            std::mem::replace(&mut cache.monitors, fresh.clone())
        };
        info!(monitors = fresh.len(), "monitor cache swapped");

        let changes = diff_statuses(&previous, &fresh, now);
        if !changes.is_empty() {
            info!(count = changes.len(), "monitor status changes detected");
        }
        if let Err(e) = repo::replace(self.store.as_ref(), &changes).await {
            warn!("could not persist status changes: {}", e);
        }

        Ok((fresh, now))
    }

    async fn aggregate(&self, monitors: &[MonitorSnapshot], now: DateTime<Utc>) {
        let mut failures = 0usize;
        for monitor in monitors {
            if let Err(e) = self
                .aggregator
                .record_observation(&monitor.id, monitor.status, now)
                .await
            {
                failures += 1;
                error!(monitor = %monitor.id, "daily aggregate update failed: {}", e);
            }
        }
        if failures > 0 {
            warn!(failures, total = monitors.len(), "some daily aggregates were not updated");
        }
    }

    async fn fetch_incidents(&self) -> ApiResult<Vec<IncidentSnapshot>> {
        let items = Pager::new(
            self.upstream.as_ref(),
            Resource::Incidents,
            self.settings.monitor_page_size,
        )
        .max_pages(self.settings.incident_page_cap)
        .collect_all()
        .await?;

        Ok(items
            .iter()
            .filter_map(IncidentSnapshot::from_upstream)
            .collect())
    }

    /// Best-effort: a failure here leaves monitors and aggregates of this cycle in place.
    async fn store_incidents(&self, incidents: Vec<IncidentSnapshot>) -> ApiResult<usize> {
        repo::replace(self.store.as_ref(), &incidents).await?;

        let count = incidents.len();
        self.cache.write().await.incidents = Arc::new(incidents);
        debug!(incidents = count, "incident cache replaced");
        Ok(count)
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    pub fn progress(&self) -> RefreshProgress {
        self.state.progress()
    }

    pub async fn monitors(&self) -> Arc<Vec<MonitorSnapshot>> {
        self.cache.read().await.monitors.clone()
    }

    pub async fn incidents(&self) -> Arc<Vec<IncidentSnapshot>> {
        self.cache.read().await.incidents.clone()
    }

    pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.cache.read().await.last_updated
    }

    pub async fn summary(&self) -> DashboardSummary {
        let (monitors, incidents, last_updated) = {
            let cache = self.cache.read().await;
            (cache.monitors.clone(), cache.incidents.clone(), cache.last_updated)
        };
        build_summary(
            &monitors,
            &incidents,
            self.is_loading(),
            self.progress(),
            last_updated,
        )
    }

    pub async fn status(&self) -> StatusReport {
        StatusReport {
            monitors_count: self.monitors().await.len(),
            is_loading: self.is_loading(),
            loading_progress: self.progress(),
            last_updated: self.last_updated().await,
        }
    }

    /// Heatmap for the cached monitors, read straight from the aggregate table
    pub async fn heatmap(&self) -> ApiResult<Vec<HeatmapRow>> {
        let today = (self.clock)().date_naive();
        let back = u64::from(self.settings.heatmap_days.saturating_sub(1));
        let since = today.checked_sub_days(Days::new(back)).unwrap_or(today);

        let aggregates = self.store.get_daily_aggregates(since).await?;
        let monitors = self.monitors().await;
        Ok(build_heatmap(
            &monitors,
            &aggregates,
            today,
            self.settings.heatmap_days,
            self.settings.down_threshold,
        ))
    }

    pub async fn status_changes(&self) -> ApiResult<Vec<StatusChangeSnapshot>> {
        let mut changes: Vec<StatusChangeSnapshot> = repo::load(self.store.as_ref()).await?;
        changes.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        Ok(changes)
    }
}

/// `None` once the deadline passes.
async fn within<F: Future>(deadline: Option<tokio::time::Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn diff_statuses(
    previous: &[MonitorSnapshot],
    current: &[MonitorSnapshot],
    at: DateTime<Utc>,
) -> Vec<StatusChangeSnapshot> {
    let before: HashMap<&str, &MonitorSnapshot> =
        previous.iter().map(|m| (m.id.as_str(), m)).collect();
    current
        .iter()
        .filter_map(|m| {
            before
                .get(m.id.as_str())
                .filter(|old| old.status != m.status)
                .map(|old| StatusChangeSnapshot::new(old, m, at))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fake::{incident_item, monitor_item, ScriptedUpstream};
    use crate::domain::{DayStatus, MonitorStatus};
    use crate::errors::ApiError;
    use crate::repo::{AggregatesByMonitor, Collection, MemoryStore, Record};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::time::Duration;

    fn settings() -> RefreshSettings {
        RefreshSettings {
            page_delay: Duration::ZERO,
            monitor_page_size: 2,
            ..RefreshSettings::default()
        }
    }

    fn fixed_clock(at: DateTime<Utc>) -> Clock {
        Arc::new(move || at)
    }

    fn day_d() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 15, 12, 0, 0).unwrap()
    }

    fn service(upstream: Arc<ScriptedUpstream>, store: Arc<dyn Store>) -> Arc<RefreshService> {
        Arc::new(RefreshService::new(upstream, store, settings()).with_clock(fixed_clock(day_d())))
    }

    async fn wait_idle(svc: &RefreshService) {
        for _ in 0..400 {
            if !svc.is_loading() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("refresh never returned to idle");
    }

    async fn today_row(store: &dyn Store, id: &str) -> Option<crate::domain::DailyAggregate> {
        store
            .get_daily_aggregates(day_d().date_naive())
            .await
            .unwrap()
            .remove(id)
            .and_then(|rows| rows.into_iter().next())
    }

    #[tokio::test]
    async fn test_first_refresh_down_monitor_shows_in_heatmap() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(
            Resource::Monitors,
            vec![vec![monitor_item("m1", "Main site", "down")]],
        );
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = service(upstream, store);

        let outcome = svc.refresh().await;
        assert_eq!(outcome, RefreshOutcome::Completed { monitors: 1 });

        let heatmap = svc.heatmap().await.unwrap();
        assert_eq!(heatmap.len(), 1);
        let days = &heatmap[0].days;
        assert_eq!(days.len(), 30);
        let today = &days[29];
        assert_eq!(today.date, day_d().date_naive());
        assert_eq!(today.status, DayStatus::Down);
        assert_eq!(today.checks_total, 1);
        assert_eq!(today.checks_failed, 1);
        assert_eq!(today.fail_rate_percent, 100);
        assert!(days[..29].iter().all(|d| d.status == DayStatus::Unknown));
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_one_cycle() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(
            Resource::Monitors,
            vec![vec![monitor_item("m1", "Main", "up")]],
        );
        let gate = upstream.hold(Resource::Monitors);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = service(upstream.clone(), store);

        assert!(svc.trigger());
        upstream.entered.notified().await;
        assert!(svc.is_loading());

        assert!(!svc.trigger());
        assert_eq!(svc.refresh().await, RefreshOutcome::Skipped);

        gate.add_permits(10);
        wait_idle(&svc).await;
        assert_eq!(upstream.calls(Resource::Monitors), 1);
        assert_eq!(svc.monitors().await.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_estimate_then_final_count() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(
            Resource::Monitors,
            vec![
                vec![monitor_item("a", "A", "up"), monitor_item("b", "B", "up")],
                vec![monitor_item("c", "C", "up")],
            ],
        );
        let gate = upstream.hold(Resource::Monitors);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = service(upstream.clone(), store);

        assert!(svc.trigger());
        upstream.entered.notified().await;
        gate.add_permits(1);
        upstream.entered.notified().await;

        assert_eq!(svc.progress(), RefreshProgress { current: 2, total: 4 });
        assert!(svc.monitors().await.is_empty());

        gate.add_permits(10);
        wait_idle(&svc).await;
        assert_eq!(svc.progress(), RefreshProgress { current: 3, total: 3 });
        assert_eq!(svc.monitors().await.len(), 3);
    }

    #[tokio::test]
    async fn test_incident_failure_keeps_monitor_work() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(
            Resource::Monitors,
            vec![vec![monitor_item("m1", "Main", "up")]],
        );
        upstream.set_pages(Resource::Incidents, vec![vec![incident_item("i1", "m1")]]);
        upstream.fail_at(Resource::Incidents, 0, 500);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = service(upstream, store.clone());

        assert_eq!(svc.refresh().await, RefreshOutcome::Completed { monitors: 1 });
        assert_eq!(svc.monitors().await.len(), 1);
        assert!(svc.incidents().await.is_empty());
        assert_eq!(store.get_all(Collection::Monitors).await.unwrap().len(), 1);
        assert_eq!(today_row(&*store, "m1").await.unwrap().checks_total, 1);
        assert!(!svc.is_loading());
    }

    #[tokio::test]
    async fn test_incidents_replaced_each_cycle() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(Resource::Monitors, vec![vec![monitor_item("m1", "Main", "up")]]);
        upstream.set_pages(
            Resource::Incidents,
            vec![vec![incident_item("i1", "m1"), incident_item("i2", "m1")]],
        );
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = service(upstream.clone(), store.clone());
        svc.refresh().await;
        assert_eq!(svc.incidents().await.len(), 2);

        upstream.set_pages(Resource::Incidents, vec![vec![incident_item("i3", "m1")]]);
        svc.refresh().await;
        let ids: Vec<_> = svc.incidents().await.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec!["i3".to_string()]);
        assert_eq!(store.get_all(Collection::Incidents).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_failure_leaves_previous_state() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(
            Resource::Monitors,
            vec![
                vec![monitor_item("a", "A", "up"), monitor_item("b", "B", "up")],
                vec![monitor_item("c", "C", "down")],
            ],
        );
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = service(upstream.clone(), store.clone());
        svc.refresh().await;
        let first_update = svc.last_updated().await;
        assert!(first_update.is_some());

        upstream.fail_at(Resource::Monitors, 1, 503);
        let later = day_d() + chrono::Duration::minutes(5);
        let svc2 = Arc::new(
            RefreshService::new(upstream.clone(), store.clone(), settings())
                .with_clock(fixed_clock(later)),
        );
        svc2.hydrate().await.unwrap();
        assert_eq!(svc2.refresh().await, RefreshOutcome::Failed);

        assert_eq!(svc2.monitors().await.len(), 3);
        assert_eq!(svc2.last_updated().await, first_update);
        assert_eq!(today_row(&*store, "c").await.unwrap().checks_total, 1);
        assert!(!svc2.is_loading());
    }

    #[tokio::test]
    async fn test_duplicate_across_pages_counted_once() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(
            Resource::Monitors,
            vec![
                vec![monitor_item("a", "A", "up"), monitor_item("b", "B", "up")],
                vec![monitor_item("b", "B", "down")],
            ],
        );
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = service(upstream, store.clone());

        assert_eq!(svc.refresh().await, RefreshOutcome::Completed { monitors: 2 });
        let b = today_row(&*store, "b").await.unwrap();
        assert_eq!(b.checks_total, 1);
        assert_eq!(b.status, MonitorStatus::Down);
    }

    #[tokio::test]
    async fn test_cycles_accumulate_and_down_sticks() {
        let upstream = Arc::new(ScriptedUpstream::new());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = service(upstream.clone(), store.clone());

        for status in ["down", "up", "up", "up"] {
            upstream.set_pages(
                Resource::Monitors,
                vec![vec![monitor_item("m1", "Main", status)]],
            );
            svc.refresh().await;
        }

        let row = today_row(&*store, "m1").await.unwrap();
        assert_eq!(row.checks_total, 4);
        assert_eq!(row.checks_failed, 1);
        assert_eq!(row.downtime_minutes, 1);
        assert_eq!(row.status, MonitorStatus::Down);

        let heatmap = svc.heatmap().await.unwrap();
        assert_eq!(heatmap[0].days[29].status, DayStatus::Partial);
        assert_eq!(heatmap[0].days[29].fail_rate_percent, 25);
    }

    #[tokio::test]
    async fn test_status_changes_recorded() {
        let upstream = Arc::new(ScriptedUpstream::new());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = service(upstream.clone(), store);

        upstream.set_pages(
            Resource::Monitors,
            vec![vec![monitor_item("m1", "Main", "up"), monitor_item("m2", "Docs", "up")]],
        );
        svc.refresh().await;
        assert!(svc.status_changes().await.unwrap().is_empty());

        upstream.set_pages(
            Resource::Monitors,
            vec![vec![monitor_item("m1", "Main", "down"), monitor_item("m2", "Docs", "up")]],
        );
        svc.refresh().await;
        let changes = svc.status_changes().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].monitor_id, "m1");
        assert_eq!(changes[0].from, MonitorStatus::Up);
        assert_eq!(changes[0].to, MonitorStatus::Down);
    }

    #[tokio::test]
    async fn test_hydrate_restores_cache_and_seeds_today() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let known = MonitorSnapshot {
            id: "m9".into(),
            name: "Known".into(),
            url: "https://known.test".into(),
            status: MonitorStatus::Up,
            monitor_type: None,
            last_checked_at: None,
        };
        repo::upsert(store.as_ref(), &[known]).await.unwrap();
        let stamp = Utc.with_ymd_and_hms(2024, 8, 14, 9, 0, 0).unwrap();
        store
            .set_metadata(LAST_UPDATED_KEY, &stamp.to_rfc3339())
            .await
            .unwrap();

        let svc = service(Arc::new(ScriptedUpstream::new()), store.clone());
        assert_eq!(svc.hydrate().await.unwrap(), 1);
        assert_eq!(svc.status().await.monitors_count, 1);
        assert_eq!(svc.last_updated().await, Some(stamp));

        let row = today_row(&*store, "m9").await.unwrap();
        assert_eq!(row.checks_total, 0);
        let heatmap = svc.heatmap().await.unwrap();
        assert_eq!(heatmap[0].days[29].status, DayStatus::Unknown);
        assert_eq!(heatmap[0].days[29].date, NaiveDate::from_ymd_opt(2024, 8, 15).unwrap());
    }

    #[tokio::test]
    async fn test_cycle_timeout_returns_to_idle() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(Resource::Monitors, vec![vec![monitor_item("m1", "Main", "up")]]);
        let _gate = upstream.hold(Resource::Monitors);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let svc = RefreshService::new(
            upstream,
            store,
            RefreshSettings {
                cycle_timeout: Some(Duration::from_millis(50)),
                ..settings()
            },
        );

        assert_eq!(svc.refresh().await, RefreshOutcome::TimedOut);
        assert!(!svc.is_loading());
        assert!(svc.monitors().await.is_empty());
    }

    /// Store whose snapshot writes can be made to fail
    struct FlakyStore {
        inner: MemoryStore,
        fail_upsert: AtomicBool,
        fail_replace: AtomicBool,
        slow_merge: Option<(&'static str, Duration)>,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_upsert: AtomicBool::new(false),
                fail_replace: AtomicBool::new(false),
                slow_merge: None,
            }
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn upsert_many(&self, c: Collection, r: Vec<Record>) -> ApiResult<()> {
            if self.fail_upsert.load(Ordering::SeqCst) {
                return Err(ApiError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.upsert_many(c, r).await
        }
        async fn replace_all(&self, c: Collection, r: Vec<Record>) -> ApiResult<()> {
            if self.fail_replace.load(Ordering::SeqCst) {
                return Err(ApiError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.replace_all(c, r).await
        }
        async fn get_all(&self, c: Collection) -> ApiResult<Vec<Record>> {
            self.inner.get_all(c).await
        }
        async fn merge_daily_aggregate(
            &self,
            id: &str,
            day: NaiveDate,
            s: MonitorStatus,
            f: bool,
        ) -> ApiResult<()> {
            if let Some((slow_id, pause)) = self.slow_merge {
                if slow_id == id {
                    tokio::time::sleep(pause).await;
                }
            }
            self.inner.merge_daily_aggregate(id, day, s, f).await
        }
        async fn init_daily_aggregate(
            &self,
            id: &str,
            day: NaiveDate,
            s: MonitorStatus,
        ) -> ApiResult<bool> {
            self.inner.init_daily_aggregate(id, day, s).await
        }
        async fn get_daily_aggregates(&self, since: NaiveDate) -> ApiResult<AggregatesByMonitor> {
            self.inner.get_daily_aggregates(since).await
        }
        async fn get_metadata(&self, key: &str) -> ApiResult<Option<String>> {
            self.inner.get_metadata(key).await
        }
        async fn set_metadata(&self, key: &str, value: &str) -> ApiResult<()> {
            self.inner.set_metadata(key, value).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_on_monitors_aborts_before_swap() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(Resource::Monitors, vec![vec![monitor_item("m1", "Main", "down")]]);
        let store = Arc::new(FlakyStore::new());
        store.fail_upsert.store(true, Ordering::SeqCst);
        let svc = service(upstream, store.clone());

        assert_eq!(svc.refresh().await, RefreshOutcome::Failed);
        assert!(svc.monitors().await.is_empty());
        assert!(svc.last_updated().await.is_none());
        assert!(today_row(&*store, "m1").await.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_on_incidents_keeps_old_incidents() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(Resource::Monitors, vec![vec![monitor_item("m1", "Main", "up")]]);
        upstream.set_pages(Resource::Incidents, vec![vec![incident_item("i1", "m1")]]);
        let store = Arc::new(FlakyStore::new());
        let svc = service(upstream.clone(), store.clone());
        svc.refresh().await;

        upstream.set_pages(Resource::Incidents, vec![vec![incident_item("i2", "m1")]]);
        store.fail_replace.store(true, Ordering::SeqCst);
        assert_eq!(svc.refresh().await, RefreshOutcome::Completed { monitors: 1 });

        assert_eq!(svc.incidents().await[0].id, "i1");
        let stored = store.get_all(Collection::Incidents).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "i1");
        assert_eq!(today_row(&*store, "m1").await.unwrap().checks_total, 2);
    }

    #[tokio::test]
    async fn test_slow_aggregation_is_not_cut_short_by_timeout() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(
            Resource::Monitors,
            vec![vec![monitor_item("a", "Alpha", "up"), monitor_item("b", "Beta", "down")]],
        );
        let store = Arc::new(FlakyStore {
            slow_merge: Some(("b", Duration::from_millis(200))),
            ..FlakyStore::new()
        });
        let svc = RefreshService::new(
            upstream,
            store.clone(),
            RefreshSettings {
                cycle_timeout: Some(Duration::from_millis(50)),
                ..settings()
            },
        )
        .with_clock(fixed_clock(day_d()));

        assert_eq!(svc.refresh().await, RefreshOutcome::Completed { monitors: 2 });
        assert!(!svc.is_loading());
        assert_eq!(svc.last_updated().await, Some(day_d()));
        assert_eq!(today_row(&*store, "a").await.unwrap().checks_total, 1);
        let b = today_row(&*store, "b").await.unwrap();
        assert_eq!(b.checks_total, 1);
        assert_eq!(b.checks_failed, 1);
    }

    #[tokio::test]
    async fn test_incident_timeout_keeps_committed_monitors() {
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.set_pages(Resource::Monitors, vec![vec![monitor_item("m1", "Main", "up")]]);
        upstream.set_pages(Resource::Incidents, vec![vec![incident_item("i1", "m1")]]);
        let _gate = upstream.hold(Resource::Incidents);
        let store = Arc::new(MemoryStore::new());
        let svc = RefreshService::new(
            upstream,
            store.clone(),
            RefreshSettings {
                cycle_timeout: Some(Duration::from_millis(50)),
                ..settings()
            },
        )
        .with_clock(fixed_clock(day_d()));

        assert_eq!(svc.refresh().await, RefreshOutcome::Completed { monitors: 1 });
        assert_eq!(svc.monitors().await.len(), 1);
        assert!(svc.incidents().await.is_empty());
        assert_eq!(today_row(&*store, "m1").await.unwrap().checks_total, 1);
    }
}

/// Domain models for the application
use crate::utils::{s_pick, t_pick};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod aggregate;

pub use aggregate::{DailyAggregate, DayStatus, HeatmapDay, HeatmapRow};

/// Monitor status as reported by the upstream API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
    Paused,
    Validating,
    Unknown,
}

impl MonitorStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Paused => "paused",
            Self::Validating => "validating",
            Self::Unknown => "unknown",
        }
    }

    /// Map an upstream status string. Anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" => Self::Up,
            "down" => Self::Down,
            "paused" | "maintenance" => Self::Paused,
            "validating" | "pending" => Self::Validating,
            _ => Self::Unknown,
        }
    }

    pub fn is_down(self) -> bool {
        self == Self::Down
    }
}

/// Point-in-time view of one upstream monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub id: String,
    pub name: String,
    pub url: String,
    pub status: MonitorStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl MonitorSnapshot {
    /// Build from a `{id, attributes: {...}}` upstream item. Items without an id are dropped.
    pub fn from_upstream(item: &Value) -> Option<Self> {
        let id = s_pick(item, &["id"])?;
        let attrs = item.get("attributes").unwrap_or(item);
        let url = s_pick(attrs, &["url"]).unwrap_or_default();
        let name = s_pick(attrs, &["pronounceable_name", "name"]).unwrap_or_else(|| url.clone());
        let status = s_pick(attrs, &["status"])
            .map(|s| MonitorStatus::parse(&s))
            .unwrap_or(MonitorStatus::Unknown);

        Some(Self {
            id,
            name,
            url,
            status,
            monitor_type: s_pick(attrs, &["monitor_type"]),
            last_checked_at: t_pick(attrs, &["last_checked_at"]),
        })
    }
}

/// Upstream incident, replaced wholesale every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSnapshot {
    pub id: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub cause: Option<String>,
    pub status: Option<String>,
    pub monitor_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl IncidentSnapshot {
    pub fn from_upstream(item: &Value) -> Option<Self> {
        let id = s_pick(item, &["id"])?;
        let attrs = item.get("attributes").unwrap_or(item);
        let monitor_id = item
            .pointer("/relationships/monitor/data")
            .and_then(|m| s_pick(m, &["id"]));

        Some(Self {
            id,
            name: s_pick(attrs, &["name"]),
            url: s_pick(attrs, &["url"]),
            cause: s_pick(attrs, &["cause"]),
            status: s_pick(attrs, &["status"]),
            monitor_id,
            started_at: t_pick(attrs, &["started_at"]),
            resolved_at: t_pick(attrs, &["resolved_at"]),
        })
    }
}

/// A monitor observed in a different status than the previous cycle saw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeSnapshot {
    pub id: String,
    pub monitor_id: String,
    pub monitor_name: String,
    pub from: MonitorStatus,
    pub to: MonitorStatus,
    pub observed_at: DateTime<Utc>,
}

impl StatusChangeSnapshot {
    pub fn new(previous: &MonitorSnapshot, current: &MonitorSnapshot, at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}:{}", current.id, at.timestamp_millis()),
            monitor_id: current.id.clone(),
            monitor_name: current.name.clone(),
            from: previous.status,
            to: current.status,
            observed_at: at,
        }
    }
}

/// Live progress of the refresh in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshProgress {
    pub current: usize,
    pub total: usize,
}

/// Per-status counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub up: usize,
    pub down: usize,
    pub paused: usize,
    pub validating: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: MonitorStatus) {
        self.total += 1;
        match status {
            MonitorStatus::Up => self.up += 1,
            MonitorStatus::Down => self.down += 1,
            MonitorStatus::Paused => self.paused += 1,
            MonitorStatus::Validating => self.validating += 1,
            MonitorStatus::Unknown => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    #[serde(flatten)]
    pub all: StatusCounts,
    pub production: StatusCounts,
    pub staging: StatusCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Categorized {
    pub production: Vec<MonitorSnapshot>,
    pub staging: Vec<MonitorSnapshot>,
    pub other: Vec<MonitorSnapshot>,
}

/// Dashboard payload, served from the in-memory cache
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub stats: DashboardStats,
    pub monitors: Vec<MonitorSnapshot>,
    pub categorized: Categorized,
    pub incidents: Vec<IncidentSnapshot>,
    pub is_loading: bool,
    pub loading_progress: RefreshProgress,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub monitors_count: usize,
    pub is_loading: bool,
    pub loading_progress: RefreshProgress,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Health check response
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub now: DateTime<Utc>,
}

use super::MonitorStatus;
use chrono::NaiveDate;
use serde::Serialize;

/// Accumulated check counters for one monitor on one UTC calendar day.
///
/// Counters only ever grow. `status` is "down" once any sample of the day was down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyAggregate {
    pub monitor_id: String,
    pub day: NaiveDate,
    pub status: MonitorStatus,
    pub downtime_minutes: i64,
    pub checks_total: i64,
    pub checks_failed: i64,
}

impl DailyAggregate {
    /// Row created by the first observation of a (monitor, day) key.
    pub fn first_sample(monitor_id: &str, day: NaiveDate, sample: MonitorStatus, failed: bool) -> Self {
        let hit = i64::from(failed);
        Self {
            monitor_id: monitor_id.to_string(),
            day,
            status: sample,
            downtime_minutes: hit,
            checks_total: 1,
            checks_failed: hit,
        }
    }

    /// Zero-counter row used to seed today's key before any check lands.
    pub fn empty(monitor_id: &str, day: NaiveDate, sample: MonitorStatus) -> Self {
        Self {
            monitor_id: monitor_id.to_string(),
            day,
            status: sample,
            downtime_minutes: 0,
            checks_total: 0,
            checks_failed: 0,
        }
    }

    /// Fold one more observation into an existing row.
    pub fn absorb(&mut self, sample: MonitorStatus, failed: bool) {
        let hit = i64::from(failed);
        self.checks_total += 1;
        self.checks_failed += hit;
        self.downtime_minutes += hit;
        self.status = if self.status.is_down() || sample.is_down() {
            MonitorStatus::Down
        } else {
            sample
        };
    }

    /// Share of failed checks, 0 when nothing was checked.
    pub fn fail_rate(&self) -> f64 {
        if self.checks_total == 0 {
            0.0
        } else {
            self.checks_failed as f64 / self.checks_total as f64
        }
    }
}

/// Display classification of one heatmap cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Up,
    Partial,
    Down,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapDay {
    pub date: NaiveDate,
    pub status: DayStatus,
    pub downtime_minutes: i64,
    pub checks_total: i64,
    pub checks_failed: i64,
    pub fail_rate_percent: u32,
}

impl HeatmapDay {
    pub fn unknown(date: NaiveDate) -> Self {
        Self {
            date,
            status: DayStatus::Unknown,
            downtime_minutes: 0,
            checks_total: 0,
            checks_failed: 0,
            fail_rate_percent: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapRow {
    pub id: String,
    pub name: String,
    pub url: String,
    pub current_status: MonitorStatus,
    pub days: Vec<HeatmapDay>,
}

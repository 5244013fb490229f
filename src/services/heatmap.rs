use crate::domain::{DailyAggregate, DayStatus, HeatmapDay, HeatmapRow, MonitorSnapshot};
use crate::repo::AggregatesByMonitor;
use crate::utils::trailing_days;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Currently-down monitors first, then by name ignoring case
pub fn display_order(a: &MonitorSnapshot, b: &MonitorSnapshot) -> Ordering {
    b.status
        .is_down()
        .cmp(&a.status.is_down())
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

/// Classify one aggregate row. Rows with no checks stay unknown.
pub fn classify(row: &DailyAggregate, down_threshold: f64) -> HeatmapDay {
    if row.checks_total == 0 {
        return HeatmapDay {
            downtime_minutes: row.downtime_minutes,
            ..HeatmapDay::unknown(row.day)
        };
    }

    let rate = row.fail_rate();
    let status = if rate >= down_threshold {
        DayStatus::Down
    } else if rate > 0.0 {
        DayStatus::Partial
    } else {
        DayStatus::Up
    };

    HeatmapDay {
        date: row.day,
        status,
        downtime_minutes: row.downtime_minutes,
        checks_total: row.checks_total,
        checks_failed: row.checks_failed,
        fail_rate_percent: (rate * 100.0).round() as u32,
    }
}

/// Build one row per monitor covering the `days` calendar days ending at `today`.
///
/// Pure over its inputs: every row has exactly `days` entries, oldest first.
pub fn build_heatmap(
    monitors: &[MonitorSnapshot],
    aggregates: &AggregatesByMonitor,
    today: NaiveDate,
    days: u32,
    down_threshold: f64,
) -> Vec<HeatmapRow> {
    let window = trailing_days(today, days);

    let mut ordered: Vec<&MonitorSnapshot> = monitors.iter().collect();
    ordered.sort_by(|a, b| display_order(a, b));

    ordered
        .into_iter()
        .map(|monitor| {
            let by_day: HashMap<NaiveDate, &DailyAggregate> = aggregates
                .get(&monitor.id)
                .map(|rows| rows.iter().map(|r| (r.day, r)).collect())
                .unwrap_or_default();

            let days = window
                .iter()
                .map(|date| match by_day.get(date) {
                    Some(row) => classify(row, down_threshold),
                    None => HeatmapDay::unknown(*date),
                })
                .collect();

            HeatmapRow {
                id: monitor.id.clone(),
                name: monitor.name.clone(),
                url: monitor.url.clone(),
                current_status: monitor.status,
                days,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MonitorStatus;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 31).unwrap()
    }

    fn monitor(id: &str, name: &str, status: MonitorStatus) -> MonitorSnapshot {
        MonitorSnapshot {
            id: id.to_string(),
            name: name.to_string(),
            url: format!("https://{}.test", id),
            status,
            monitor_type: None,
            last_checked_at: None,
        }
    }

    fn row(total: i64, failed: i64) -> DailyAggregate {
        DailyAggregate {
            monitor_id: "m1".into(),
            day: today(),
            status: MonitorStatus::Up,
            downtime_minutes: failed,
            checks_total: total,
            checks_failed: failed,
        }
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(classify(&row(0, 0), 0.5).status, DayStatus::Unknown);
        assert_eq!(classify(&row(10, 0), 0.5).status, DayStatus::Up);
        assert_eq!(classify(&row(10, 4), 0.5).status, DayStatus::Partial);
        assert_eq!(classify(&row(10, 5), 0.5).status, DayStatus::Down);
        assert_eq!(classify(&row(10, 10), 0.5).status, DayStatus::Down);
        assert_eq!(classify(&row(1000, 1), 0.5).status, DayStatus::Partial);
    }

    #[test]
    fn test_fail_rate_percent_rounds() {
        assert_eq!(classify(&row(10, 4), 0.5).fail_rate_percent, 40);
        assert_eq!(classify(&row(3, 1), 0.5).fail_rate_percent, 33);
        assert_eq!(classify(&row(3, 2), 0.5).fail_rate_percent, 67);
        assert_eq!(classify(&row(1000, 1), 0.5).fail_rate_percent, 0);
    }

    #[test]
    fn test_every_row_has_full_window() {
        let monitors = vec![monitor("m1", "One", MonitorStatus::Up)];
        let mut aggregates = AggregatesByMonitor::new();
        aggregates.insert("m1".into(), vec![row(4, 1)]);

        let heatmap = build_heatmap(&monitors, &aggregates, today(), 30, 0.5);
        let days = &heatmap[0].days;
        assert_eq!(days.len(), 30);
        assert!(days.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(days[29].date, today());
        assert_eq!(days[29].status, DayStatus::Partial);
        assert!(days[..29].iter().all(|d| d.status == DayStatus::Unknown));
    }

    #[test]
    fn test_rows_outside_window_ignored() {
        let monitors = vec![monitor("m1", "One", MonitorStatus::Up)];
        let mut old = row(5, 5);
        old.day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut aggregates = AggregatesByMonitor::new();
        aggregates.insert("m1".into(), vec![old]);

        let heatmap = build_heatmap(&monitors, &aggregates, today(), 30, 0.5);
        assert!(heatmap[0]
            .days
            .iter()
            .all(|d| d.status == DayStatus::Unknown));
    }

    #[test]
    fn test_down_monitors_first_then_name() {
        let monitors = vec![
            monitor("1", "beta", MonitorStatus::Up),
            monitor("2", "Alpha", MonitorStatus::Up),
            monitor("3", "zulu", MonitorStatus::Down),
            monitor("4", "Charlie", MonitorStatus::Paused),
            monitor("5", "delta", MonitorStatus::Down),
        ];

        let heatmap = build_heatmap(&monitors, &AggregatesByMonitor::new(), today(), 30, 0.5);
        let names: Vec<_> = heatmap.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["delta", "zulu", "Alpha", "beta", "Charlie"]);
    }
}

use super::heatmap::display_order;
use crate::domain::{
    Categorized, DashboardStats, DashboardSummary, IncidentSnapshot, MonitorSnapshot,
    RefreshProgress,
};
use crate::utils::contains_any;
use chrono::{DateTime, Utc};

const STAGING_MARKERS: &[&str] = &["staging", "stage", "stg"];
const PRODUCTION_MARKERS: &[&str] = &["prod", "live"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Production,
    Staging,
    Other,
}

/// Staging markers win over production ones, name and URL both count.
pub fn categorize(monitor: &MonitorSnapshot) -> Category {
    let text = format!("{} {}", monitor.name, monitor.url);
    if contains_any(&text, STAGING_MARKERS) {
        Category::Staging
    } else if contains_any(&text, PRODUCTION_MARKERS) {
        Category::Production
    } else {
        Category::Other
    }
}

pub fn build_summary(
    monitors: &[MonitorSnapshot],
    incidents: &[IncidentSnapshot],
    is_loading: bool,
    loading_progress: RefreshProgress,
    last_updated: Option<DateTime<Utc>>,
) -> DashboardSummary {
    let mut ordered = monitors.to_vec();
    ordered.sort_by(display_order);

    let mut stats = DashboardStats::default();
    let mut categorized = Categorized::default();
    for monitor in &ordered {
        stats.all.add(monitor.status);
        match categorize(monitor) {
            Category::Production => {
                stats.production.add(monitor.status);
                categorized.production.push(monitor.clone());
            }
            Category::Staging => {
                stats.staging.add(monitor.status);
                categorized.staging.push(monitor.clone());
            }
            Category::Other => categorized.other.push(monitor.clone()),
        }
    }

    DashboardSummary {
        stats,
        monitors: ordered,
        categorized,
        incidents: incidents.to_vec(),
        is_loading,
        loading_progress,
        last_updated,
    }
}

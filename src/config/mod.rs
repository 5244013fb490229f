/// Application configuration module
use crate::errors::{ApiError, ApiResult};
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub api_url: String,
    pub api_token: String,
    pub listen_addr: String,
    pub proxy_timeout: Duration,
    pub refresh: RefreshSettings,
}

/// Knobs consumed by the refresh and heatmap pipeline
#[derive(Clone, Debug)]
pub struct RefreshSettings {
    pub interval: Duration,
    /// `None` leaves a cycle unbounded.
    pub cycle_timeout: Option<Duration>,
    pub monitor_page_size: u32,
    pub incident_page_cap: u32,
    pub page_delay: Duration,
    pub heatmap_days: u32,
    pub down_threshold: f64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            cycle_timeout: Some(Duration::from_secs(600)),
            monitor_page_size: 50,
            incident_page_cap: 5,
            page_delay: Duration::from_millis(100),
            heatmap_days: 30,
            down_threshold: 0.5,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ApiResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(get: F) -> ApiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_token = get("UPTIME_API_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ApiError::Config("UPTIME_API_TOKEN is required".to_string()))?;

        let api_url = get("UPTIME_API_URL")
            .unwrap_or_else(|| "https://uptime.betterstack.com/api/v2".to_string());

        let database_url = get("DATABASE_URL").filter(|s| !s.is_empty());

        let listen_addr = get("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());

        let defaults = RefreshSettings::default();
        let timeout_secs = parsed(&get, "REFRESH_TIMEOUT_SECONDS", 600u64);
        let refresh = RefreshSettings {
            interval: Duration::from_secs(parsed(&get, "REFRESH_EVERY_SECONDS", 300)),
            cycle_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            monitor_page_size: parsed(&get, "MONITOR_PAGE_SIZE", defaults.monitor_page_size),
            incident_page_cap: parsed(&get, "INCIDENT_PAGE_CAP", defaults.incident_page_cap),
            page_delay: Duration::from_millis(parsed(&get, "PAGE_DELAY_MS", 100)),
            heatmap_days: parsed(&get, "HEATMAP_DAYS", defaults.heatmap_days),
            // Must lie in (0, 1]; NaN fails both comparisons
            down_threshold: Some(parsed(&get, "DOWN_THRESHOLD", f64::NAN))
                .filter(|t| *t > 0.0 && *t <= 1.0)
                .unwrap_or(defaults.down_threshold),
        };

        Ok(Self {
            database_url,
            api_url,
            api_token,
            listen_addr,
            proxy_timeout: Duration::from_secs(parsed(&get, "PROXY_TIMEOUT_SECONDS", 30)),
            refresh,
        })
    }
}

fn parsed<F, T>(get: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    get(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

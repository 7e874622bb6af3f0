use chrono::Utc;
use redis::RedisError;
use serde::Serialize;

use crate::store::RedisStore;

/// Stats keys are forgiven after a week.
const STATS_TTL_SECONDS: i64 = 604_800;
const AVERAGE_WINDOW_DAYS: i64 = 7;

/// Cities surfaced on the stats endpoint regardless of traffic.
const TRACKED_CITIES: &[&str] = &[
    "Bengaluru",
    "Hyderabad",
    "Pune",
    "Chennai",
    "Kolkata",
    "Mumbai",
    "Delhi",
    "Noida",
    "Gurgaon",
];

#[derive(Debug, Serialize)]
pub struct CityStat {
    pub city: String,
    pub views: u64,
    pub daily_average: u64,
}

#[derive(Debug, Serialize)]
pub struct DailyStats {
    pub unique_ips: u64,
    pub message_count: u64,
}

/// Daily visitor and message counters, bucketed per UTC day.
#[derive(Clone)]
pub struct StatsTracker {
    store: RedisStore,
}

impl StatsTracker {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    fn day_offset(days_back: i64) -> String {
        (Utc::now() - chrono::Duration::days(days_back))
            .format("%Y-%m-%d")
            .to_string()
    }

    /// Count a visitor IP once per day.
    pub async fn note_visitor(&self, ip: &str) -> Result<(), RedisError> {
        let key = format!("stats:unique_ips:{}", Self::today());
        self.store.sadd(&key, ip).await?;
        self.store.expire(&key, STATS_TTL_SECONDS).await?;
        Ok(())
    }

    /// Count a city page view, deduplicated per fingerprint per day.
    pub async fn note_city_view(&self, city: &str, fingerprint: &str) -> Result<(), RedisError> {
        let today = Self::today();
        let visitors_key = format!("stats:city_visitors:{}:{}", city, today);

        if self.store.sadd(&visitors_key, fingerprint).await? {
            let views_key = format!("stats:city_views:{}:{}", city, today);
            self.store.incr(&views_key).await?;
            self.store.expire(&views_key, STATS_TTL_SECONDS).await?;
        }
        self.store.expire(&visitors_key, STATS_TTL_SECONDS).await?;
        Ok(())
    }

    pub async fn bump_daily_messages(&self) -> Result<(), RedisError> {
        let key = format!("stats:message_count:{}", Self::today());
        self.store.incr(&key).await?;
        self.store.expire(&key, STATS_TTL_SECONDS).await?;
        Ok(())
    }

    pub async fn daily(&self) -> Result<DailyStats, RedisError> {
        let today = Self::today();
        let unique_ips = self
            .store
            .scard(&format!("stats:unique_ips:{}", today))
            .await? as u64;
        let message_count = self
            .store
            .get(&format!("stats:message_count:{}", today))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(DailyStats {
            unique_ips,
            message_count,
        })
    }

    /// Per-city views for today plus the 7-day average, sorted by views
    /// descending. `current_city` is always included.
    pub async fn city_views(&self, current_city: Option<&str>) -> Result<Vec<CityStat>, RedisError> {
        let mut cities: Vec<String> = TRACKED_CITIES.iter().map(|c| c.to_string()).collect();
        if let Some(city) = current_city {
            let city = city.trim();
            if !city.is_empty() && !cities.iter().any(|c| c.eq_ignore_ascii_case(city)) {
                cities.push(city.to_string());
            }
        }

        let mut stats = Vec::with_capacity(cities.len());
        for city in cities {
            let keys: Vec<String> = (0..AVERAGE_WINDOW_DAYS)
                .map(|back| format!("stats:city_views:{}:{}", city, Self::day_offset(back)))
                .collect();
            let values = self.store.mget(&keys).await?;

            let counts: Vec<u64> = values
                .into_iter()
                .map(|v| v.and_then(|s| s.parse().ok()).unwrap_or(0))
                .collect();
            let views = counts.first().copied().unwrap_or(0);
            let total: u64 = counts.iter().sum();
            let daily_average = total / AVERAGE_WINDOW_DAYS as u64;

            stats.push(CityStat {
                city,
                views,
                daily_average,
            });
        }

        stats.sort_by(|a, b| b.views.cmp(&a.views));
        Ok(stats)
    }
}

//! Read-only views of the data mart for the dashboard, cached for a fixed TTL.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use serde::Serialize;
use sqlx::FromRow;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::DashboardConfig;
use crate::dataset::quote_ident;
use crate::db::DbPool;
use crate::error::{PipelineError, Result};
use crate::mart::MART_TABLES;

pub const TOP_ZONES: i64 = 10;

/// Values expire `ttl` after insertion; expired entries are evicted on read.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => {
                return Some(value.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TripSample {
    pub vendor_name: String,
    pub month: Option<i32>,
    pub week: Option<i32>,
    pub day: Option<i32>,
    pub hour: Option<i32>,
    pub zone_pickup: Option<String>,
    pub zone_dropoff: Option<String>,
    pub total_amount: Option<f64>,
    pub payment_method: String,
}

/// Headline figures over a trip sample. A trip with a zero total counts as
/// cancelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSummary {
    pub trips: usize,
    pub total_amount: f64,
    pub cancelled: usize,
    pub cancelled_pct: f64,
}

impl SampleSummary {
    pub fn from_trips(trips: &[TripSample]) -> Self {
        let total_amount = trips.iter().filter_map(|trip| trip.total_amount).sum();
        let cancelled = trips
            .iter()
            .filter(|trip| trip.total_amount == Some(0.0))
            .count();
        let cancelled_pct = if trips.is_empty() {
            0.0
        } else {
            cancelled as f64 * 100.0 / trips.len() as f64
        };
        Self {
            trips: trips.len(),
            total_amount,
            cancelled,
            cancelled_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct ZoneCount {
    pub zone: Option<String>,
    pub trips: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct HourCount {
    pub hour: i32,
    pub trips: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PaymentBreakdown {
    pub payment_method: String,
    pub trips: i64,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct VendorRevenue {
    pub vendor_name: String,
    pub trips: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardAggregates {
    pub top_pickup_zones: Vec<ZoneCount>,
    pub top_dropoff_zones: Vec<ZoneCount>,
    pub trips_per_hour: Vec<HourCount>,
    pub payments: Vec<PaymentBreakdown>,
    pub vendors: Vec<VendorRevenue>,
}

const TRIP_SAMPLE_SQL: &str = "\
SELECT v.vendor_name,
       COALESCE(tp.month, td.month) AS month,
       COALESCE(tp.week, td.week) AS week,
       COALESCE(tp.day, td.day) AS day,
       COALESCE(tp.hour, td.hour) AS hour,
       zp.name_zone AS zone_pickup,
       zd.name_zone AS zone_dropoff,
       f.total_amount,
       p.payment_method
FROM fact_yellow_taxi f
JOIN dimension_payment p ON f.id_payment_type = p.id_payment_type
JOIN dimension_time tp ON f.id_time_pickup = tp.id_time
JOIN dimension_time td ON f.id_time_dropoff = td.id_time
JOIN dimension_vendor v ON f.id_vendor = v.id_vendor
JOIN dimension_zone zp ON f.id_zone_pickup = zp.id_zone
JOIN dimension_zone zd ON f.id_zone_dropoff = zd.id_zone
LIMIT $1";

const PICKUP_ZONES_SQL: &str = "\
SELECT z.name_zone AS zone, COUNT(*) AS trips
FROM fact_yellow_taxi f
JOIN dimension_zone z ON f.id_zone_pickup = z.id_zone
GROUP BY z.name_zone
ORDER BY trips DESC, zone
LIMIT $1";

const DROPOFF_ZONES_SQL: &str = "\
SELECT z.name_zone AS zone, COUNT(*) AS trips
FROM fact_yellow_taxi f
JOIN dimension_zone z ON f.id_zone_dropoff = z.id_zone
GROUP BY z.name_zone
ORDER BY trips DESC, zone
LIMIT $1";

const TRIPS_PER_HOUR_SQL: &str = "\
SELECT t.hour AS hour, COUNT(*) AS trips
FROM fact_yellow_taxi f
JOIN dimension_time t ON f.id_time_pickup = t.id_time
GROUP BY t.hour
ORDER BY t.hour";

const PAYMENTS_SQL: &str = "\
SELECT p.payment_method, COUNT(*) AS trips,
       COALESCE(SUM(f.total_amount), 0)::DOUBLE PRECISION AS total_amount
FROM fact_yellow_taxi f
JOIN dimension_payment p ON f.id_payment_type = p.id_payment_type
GROUP BY p.payment_method
ORDER BY trips DESC";

const VENDORS_SQL: &str = "\
SELECT v.vendor_name, COUNT(*) AS trips,
       COALESCE(SUM(f.total_amount), 0)::DOUBLE PRECISION AS revenue
FROM fact_yellow_taxi f
JOIN dimension_vendor v ON f.id_vendor = v.id_vendor
GROUP BY v.vendor_name
ORDER BY revenue DESC";

/// Only the mart's own tables may be browsed.
pub fn mart_table(name: &str) -> Result<&'static str> {
    MART_TABLES
        .iter()
        .copied()
        .find(|table| *table == name)
        .ok_or_else(|| PipelineError::UnknownTable(name.to_string()))
}

type PageKey = (&'static str, i64, i64);

pub struct DashboardReader {
    pool: DbPool,
    sample_limit: i64,
    samples: Mutex<TtlCache<i64, Vec<TripSample>>>,
    counts: Mutex<TtlCache<&'static str, i64>>,
    pages: Mutex<TtlCache<PageKey, Vec<serde_json::Value>>>,
    aggregates: Mutex<TtlCache<(), DashboardAggregates>>,
}

impl DashboardReader {
    pub fn new(pool: DbPool, config: &DashboardConfig) -> Self {
        Self {
            pool,
            sample_limit: config.sample_limit,
            samples: Mutex::new(TtlCache::new(config.cache_ttl)),
            counts: Mutex::new(TtlCache::new(config.cache_ttl)),
            pages: Mutex::new(TtlCache::new(config.cache_ttl)),
            aggregates: Mutex::new(TtlCache::new(config.cache_ttl)),
        }
    }

    pub async fn trip_sample(&self, limit: Option<i64>) -> Result<Vec<TripSample>> {
        let limit = limit.unwrap_or(self.sample_limit).max(0);
        if let Some(hit) = self.samples.lock().await.get(&limit) {
            return Ok(hit);
        }

        let rows: Vec<TripSample> = sqlx::query_as(TRIP_SAMPLE_SQL)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        debug!(limit, rows = rows.len(), "trip sample fetched");
        self.samples.lock().await.insert(limit, rows.clone());
        Ok(rows)
    }

    pub async fn table_row_count(&self, table: &str) -> Result<i64> {
        let table = mart_table(table)?;
        if let Some(hit) = self.counts.lock().await.get(&table) {
            return Ok(hit);
        }

        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await?;
        self.counts.lock().await.insert(table, count);
        Ok(count)
    }

    /// One page of a mart table, each row rendered as a JSON object.
    pub async fn table_page(
        &self,
        table: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<serde_json::Value>> {
        let table = mart_table(table)?;
        let key = (table, limit.max(0), offset.max(0));
        if let Some(hit) = self.pages.lock().await.get(&key) {
            return Ok(hit);
        }

        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&format!(
            "SELECT row_to_json(t) FROM (SELECT * FROM {} LIMIT $1 OFFSET $2) t",
            quote_ident(table)?
        ))
        .bind(key.1)
        .bind(key.2)
        .fetch_all(&self.pool)
        .await?;
        self.pages.lock().await.insert(key, rows.clone());
        Ok(rows)
    }

    pub async fn aggregates(&self) -> Result<DashboardAggregates> {
        if let Some(hit) = self.aggregates.lock().await.get(&()) {
            return Ok(hit);
        }

        let aggregates = DashboardAggregates {
            top_pickup_zones: sqlx::query_as(PICKUP_ZONES_SQL)
                .bind(TOP_ZONES)
                .fetch_all(&self.pool)
                .await?,
            top_dropoff_zones: sqlx::query_as(DROPOFF_ZONES_SQL)
                .bind(TOP_ZONES)
                .fetch_all(&self.pool)
                .await?,
            trips_per_hour: sqlx::query_as(TRIPS_PER_HOUR_SQL)
                .fetch_all(&self.pool)
                .await?,
            payments: sqlx::query_as(PAYMENTS_SQL).fetch_all(&self.pool).await?,
            vendors: sqlx::query_as(VENDORS_SQL).fetch_all(&self.pool).await?,
        };
        self.aggregates.lock().await.insert((), aggregates.clone());
        Ok(aggregates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip(total: Option<f64>) -> TripSample {
        TripSample {
            vendor_name: "Curb Mobility, LLC".into(),
            month: Some(12),
            week: Some(1),
            day: Some(2),
            hour: Some(8),
            zone_pickup: Some("JFK Airport".into()),
            zone_dropoff: Some("Midtown Center".into()),
            total_amount: total,
            payment_method: "Credit card".into(),
        }
    }

    #[test]
    fn summary_counts_zero_totals_as_cancelled() {
        let summary = SampleSummary::from_trips(&[
            trip(Some(20.0)),
            trip(Some(0.0)),
            trip(None),
            trip(Some(5.5)),
        ]);
        assert_eq!(summary.trips, 4);
        assert_eq!(summary.cancelled, 1);
        assert!((summary.total_amount - 25.5).abs() < f64::EPSILON);
        assert!((summary.cancelled_pct - 25.0).abs() < f64::EPSILON);
        assert_eq!(SampleSummary::from_trips(&[]).cancelled_pct, 0.0);
    }

    #[test]
    fn only_mart_tables_are_browsable() {
        assert_eq!(mart_table("dimension_zone").unwrap(), "dimension_zone");
        assert!(matches!(
            mart_table("pg_shadow"),
            Err(PipelineError::UnknownTable(name)) if name == "pg_shadow"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire_after_ttl() {
        let mut cache = TtlCache::new(Duration::from_secs(86_400));
        cache.insert("dimension_zone", 265i64);

        tokio::time::advance(Duration::from_secs(86_399)).await;
        assert_eq!(cache.get(&"dimension_zone"), Some(265));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"dimension_zone"), None);
        assert!(cache.is_empty());
    }
}

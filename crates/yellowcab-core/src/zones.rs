//! Taxi zone lookup, the reference data behind `dimension_zone`.

use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use crate::db::DbPool;
use crate::error::Result;
use crate::source::ExtractSource;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneRecord {
    #[serde(rename = "LocationID")]
    pub location_id: i32,
    #[serde(rename = "Borough")]
    pub borough: Option<String>,
    #[serde(rename = "Zone")]
    pub zone: Option<String>,
    pub service_zone: Option<String>,
}

pub fn parse_zone_lookup(bytes: &[u8]) -> Result<Vec<ZoneRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let records = reader
        .deserialize::<ZoneRecord>()
        .collect::<std::result::Result<Vec<_>, csv::Error>>()?;
    Ok(records)
}

/// Inserts every zone in one transaction; zones already present are kept.
/// Returns the number of rows actually inserted.
pub async fn insert_zones(pool: &DbPool, zones: &[ZoneRecord]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    // Four binds per row keeps each statement far below the parameter limit.
    for chunk in zones.chunks(1000) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO dimension_zone (id_zone, borough, name_zone, service_zone) ",
        );
        builder.push_values(chunk, |mut row, zone| {
            row.push_bind(zone.location_id)
                .push_bind(zone.borough.as_deref())
                .push_bind(zone.zone.as_deref())
                .push_bind(zone.service_zone.as_deref());
        });
        builder.push(" ON CONFLICT (id_zone) DO NOTHING");
        inserted += builder.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ZoneLoadReport {
    pub parsed: usize,
    pub inserted: u64,
}

/// Downloads the lookup file from the origin and stores it in the mart.
pub async fn load_zone_lookup(source: &dyn ExtractSource, pool: &DbPool) -> Result<ZoneLoadReport> {
    let body = source.fetch_zone_lookup().await?;
    let zones = parse_zone_lookup(&body)?;
    let inserted = insert_zones(pool, &zones).await?;
    info!(parsed = zones.len(), inserted, "zone lookup loaded");
    Ok(ZoneLoadReport {
        parsed: zones.len(),
        inserted,
    })
}

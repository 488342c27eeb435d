#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use polars::prelude::*;
use yellowcab_core::error::{PipelineError, Result};
use yellowcab_core::source::{AvailabilityProbe, ExtractSource};
use yellowcab_core::Period;

/// Origin double publishing a fixed set of extracts and recording every probe.
#[derive(Default)]
pub struct FakeOrigin {
    extracts: HashMap<Period, Bytes>,
    zone_lookup: Option<Bytes>,
    probes: Mutex<Vec<Period>>,
}

impl FakeOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extract(mut self, period: Period, body: Vec<u8>) -> Self {
        self.extracts.insert(period, Bytes::from(body));
        self
    }

    pub fn with_zone_lookup(mut self, body: &str) -> Self {
        self.zone_lookup = Some(Bytes::from(body.to_string()));
        self
    }

    pub fn probes(&self) -> Vec<Period> {
        self.probes.lock().unwrap().clone()
    }
}

#[async_trait]
impl AvailabilityProbe for FakeOrigin {
    async fn exists(&self, period: Period) -> bool {
        self.probes.lock().unwrap().push(period);
        self.extracts.contains_key(&period)
    }
}

#[async_trait]
impl ExtractSource for FakeOrigin {
    async fn fetch(&self, period: Period) -> Result<Bytes> {
        self.extracts
            .get(&period)
            .cloned()
            .ok_or_else(|| PipelineError::Processing(format!("{period} not published")))
    }

    async fn fetch_zone_lookup(&self) -> Result<Bytes> {
        self.zone_lookup
            .clone()
            .ok_or_else(|| PipelineError::Processing("zone lookup not published".into()))
    }
}

pub fn period(year: i32, month: u32) -> Period {
    Period::new(year, month).unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// A small trip extract whose pickups fall on the first day of `period`.
pub fn trips_frame(period: Period, rows: usize) -> DataFrame {
    let (start, _) = period.window();
    let pickups: Vec<i64> = (0..rows)
        .map(|i| (start + chrono::Duration::minutes(i as i64)).and_utc().timestamp_micros())
        .collect();
    let pickup = Series::new("tpep_pickup_datetime".into(), pickups)
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
        .unwrap();
    let vendors = Series::new("VendorID".into(), vec![2i32; rows]);
    let totals = Series::new(
        "Total_Amount".into(),
        (0..rows).map(|i| 10.0 + i as f64).collect::<Vec<f64>>(),
    );
    let flags = Series::new(
        "store_and_fwd_flag".into(),
        (0..rows).map(|i| (i % 2 == 0).then_some("N")).collect::<Vec<_>>(),
    );
    DataFrame::new(vec![vendors.into(), pickup.into(), totals.into(), flags.into()]).unwrap()
}

pub fn parquet_bytes(mut frame: DataFrame) -> Vec<u8> {
    let mut buffer = Vec::new();
    ParquetWriter::new(&mut buffer).finish(&mut frame).unwrap();
    buffer
}

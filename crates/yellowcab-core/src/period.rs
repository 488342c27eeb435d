use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

const EXTRACT_PREFIX: &str = "yellow_tripdata_";
const EXTRACT_SUFFIX: &str = ".parquet";

/// A calendar month naming one monthly trip extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, PipelineError> {
        if !(1..=12).contains(&month) {
            return Err(PipelineError::Processing(format!(
                "month {month} is outside 1..=12"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The month before the one containing `date`.
    pub fn preceding(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
        .previous()
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or(NaiveDate::MIN)
    }

    /// Half-open `[start, end)` timestamp range covered by the month.
    pub fn window(&self) -> (NaiveDateTime, NaiveDateTime) {
        let start = self.first_day().and_time(chrono::NaiveTime::MIN);
        let end = self.next().first_day().and_time(chrono::NaiveTime::MIN);
        (start, end)
    }

    pub fn extract_name(&self) -> String {
        format!(
            "{EXTRACT_PREFIX}{:04}-{:02}{EXTRACT_SUFFIX}",
            self.year, self.month
        )
    }

    pub fn from_extract_name(name: &str) -> Result<Self, PipelineError> {
        let invalid = || PipelineError::InvalidExtractName(name.to_string());
        let stem = name
            .strip_prefix(EXTRACT_PREFIX)
            .and_then(|rest| rest.strip_suffix(EXTRACT_SUFFIX))
            .ok_or_else(invalid)?;
        stem.parse().map_err(|_| invalid())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineError::Processing(format!("'{value}' is not a YYYY-MM period"));
        let (year, month) = value.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Period::new(year, month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn january_wraps_to_previous_december() {
        assert_eq!(
            Period::preceding(date(2025, 1, 15)),
            Period::new(2024, 12).unwrap()
        );
        for year in [1999, 2000, 2024, 2025] {
            let january = Period::new(year, 1).unwrap();
            assert_eq!(january.previous(), Period::new(year - 1, 12).unwrap());
        }
    }

    #[test]
    fn mid_year_steps_one_month() {
        assert_eq!(
            Period::preceding(date(2025, 7, 1)),
            Period::new(2025, 6).unwrap()
        );
        assert_eq!(
            Period::new(2024, 12).unwrap().next(),
            Period::new(2025, 1).unwrap()
        );
    }

    #[test]
    fn extract_name_is_zero_padded_and_parses_back() {
        let period = Period::new(2024, 3).unwrap();
        assert_eq!(period.extract_name(), "yellow_tripdata_2024-03.parquet");
        assert_eq!(
            Period::from_extract_name("yellow_tripdata_2024-03.parquet").unwrap(),
            period
        );
        assert!(Period::from_extract_name("green_tripdata_2024-03.parquet").is_err());
        assert!(Period::from_extract_name("yellow_tripdata_2024-13.parquet").is_err());
    }

    #[test]
    fn window_spans_whole_month() {
        let (start, end) = Period::new(2024, 12).unwrap().window();
        assert_eq!(start, date(2024, 12, 1).and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(end, date(2025, 1, 1).and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn rejects_invalid_months() {
        assert!(Period::new(2024, 0).is_err());
        assert!(Period::new(2024, 13).is_err());
    }
}

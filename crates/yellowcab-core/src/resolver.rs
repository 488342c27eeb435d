use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::period::Period;
use crate::source::AvailabilityProbe;

pub const DEFAULT_MAX_LOOKBACK: u32 = 36;

/// Finds the most recent published period by walking back from today.
pub struct LatestPeriodResolver<'a, P: AvailabilityProbe + ?Sized> {
    probe: &'a P,
    max_lookback: u32,
}

impl<'a, P: AvailabilityProbe + ?Sized> LatestPeriodResolver<'a, P> {
    pub fn new(probe: &'a P) -> Self {
        Self {
            probe,
            max_lookback: DEFAULT_MAX_LOOKBACK,
        }
    }

    pub fn with_max_lookback(mut self, max_lookback: u32) -> Self {
        self.max_lookback = max_lookback;
        self
    }

    /// Probes at most `max_lookback` months, newest first, starting with the
    /// month before `today`.
    pub async fn resolve(&self, today: NaiveDate) -> Result<Period> {
        let newest = Period::preceding(today);
        let mut candidate = newest;
        let mut oldest = newest;

        for attempt in 1..=self.max_lookback {
            if self.probe.exists(candidate).await {
                info!(period = %candidate, attempts = attempt, "latest published extract resolved");
                return Ok(candidate);
            }
            debug!(period = %candidate, "no extract, stepping back one month");
            oldest = candidate;
            candidate = candidate.previous();
        }

        Err(PipelineError::NoDataInWindow {
            newest,
            oldest,
            probed: self.max_lookback,
        })
    }
}

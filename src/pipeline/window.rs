//! Fetch window for a sync pass.

use chrono::{DateTime, Datelike, Months, NaiveTime, TimeDelta, Utc};

use crate::pipeline::types::SyncCheckpoint;

/// Lower bound of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    /// Logical start: the last successful sync, or the bootstrap date.
    pub start: DateTime<Utc>,
    /// Bound handed to the mail source: `start` minus one day, because
    /// providers filter by whole days and exclude the boundary day.
    pub fetch_after: DateTime<Utc>,
    /// No usable checkpoint existed.
    pub is_first_sync: bool,
}

impl SyncWindow {
    /// Incremental from `last_sync_at` when the checkpoint has one; otherwise
    /// from the first day of the month `lookback_months` before `now`.
    pub fn determine(
        checkpoint: Option<&SyncCheckpoint>,
        now: DateTime<Utc>,
        lookback_months: u32,
    ) -> Self {
        let (start, is_first_sync) = match checkpoint.and_then(|c| c.last_sync_at) {
            Some(last) => (last, false),
            None => (bootstrap_start(now, lookback_months), true),
        };

        Self {
            start,
            fetch_after: start - TimeDelta::days(1),
            is_first_sync,
        }
    }
}

/// Midnight UTC on the first day of the month `months` before `now`.
pub fn bootstrap_start(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let today = now.date_naive();
    let first_of_month = today.with_day(1).unwrap_or(today);
    first_of_month
        .checked_sub_months(Months::new(months))
        .unwrap_or(first_of_month)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

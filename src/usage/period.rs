//! Usage period boundaries.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// How long past its reset a period counter is kept before the ledger
/// reclaims it.
const RETENTION_GRACE_SECS: u64 = 86_400;

/// A calendar-month usage period in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsagePeriod {
    /// Identifier used in ledger keys, e.g. `2026-10`
    pub id: String,
    /// First instant of the period
    pub starts_at: DateTime<Utc>,
    /// First instant of the next period
    pub resets_at: DateTime<Utc>,
}

impl UsagePeriod {
    /// The period containing `now`.
    pub fn containing(now: DateTime<Utc>) -> Self {
        let (year, month) = (now.year(), now.month());
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };

        Self {
            id: format!("{:04}-{:02}", year, month),
            starts_at: month_start(year, month),
            resets_at: month_start(next_year, next_month),
        }
    }

    /// Time-to-live for a counter created at `now` in this period.
    pub fn counter_ttl_secs(&self, now: DateTime<Utc>) -> u64 {
        let until_reset = (self.resets_at - now).num_seconds().max(0) as u64;
        until_reset + RETENTION_GRACE_SECS
    }
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or_default()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_mid_month() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 30, 0).unwrap();
        let period = UsagePeriod::containing(now);

        assert_eq!(period.id, "2026-10");
        assert_eq!(period.starts_at, Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap());
        assert_eq!(period.resets_at, Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_period_rolls_over_year() {
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        let period = UsagePeriod::containing(now);

        assert_eq!(period.id, "2026-12");
        assert_eq!(period.resets_at, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_boundary_belongs_to_new_period() {
        let now = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(UsagePeriod::containing(now).id, "2027-01");
    }

    #[test]
    fn test_counter_ttl_outlives_period() {
        let now = Utc.with_ymd_and_hms(2026, 10, 31, 23, 0, 0).unwrap();
        let period = UsagePeriod::containing(now);

        assert_eq!(period.counter_ttl_secs(now), 3_600 + RETENTION_GRACE_SECS);
    }
}

use std::fmt;
use time::{OffsetDateTime, UtcOffset};

use crate::Family;

/// The time partition a shard holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShardPeriod {
    Year(i32),
    /// In-progress partition for the present year, still being appended to.
    Current,
    /// Multi-year hourly averages keyed by calendar position.
    Climatology,
}

impl fmt::Display for ShardPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardPeriod::Year(year) => write!(f, "{:04}", year),
            ShardPeriod::Current => write!(f, "current"),
            ShardPeriod::Climatology => write!(f, "climatology"),
        }
    }
}

/// Yearly shards that can hold rows inside `[start, end]`.
///
/// Shards are partitioned by UTC year, but callers reason in local time, so
/// both readings of each bound are considered: a local New Year's Eve west
/// of Greenwich already lives in next year's UTC shard. Years before the
/// family's coverage floor or after `present_year` are skipped, and the
/// in-progress `current` shard is added once the window reaches the present.
pub fn plan_periods(
    family: Family,
    start: OffsetDateTime,
    end: OffsetDateTime,
    offset: UtcOffset,
    present_year: i32,
) -> Vec<ShardPeriod> {
    let first = start
        .to_offset(UtcOffset::UTC)
        .year()
        .min(start.to_offset(offset).year())
        .max(family.coverage_floor());
    let last_in_window = end
        .to_offset(UtcOffset::UTC)
        .year()
        .max(end.to_offset(offset).year());
    let last = last_in_window.min(present_year);

    let mut periods: Vec<ShardPeriod> = (first..=last).map(ShardPeriod::Year).collect();
    if last_in_window >= present_year && first <= present_year {
        periods.push(ShardPeriod::Current);
    }
    periods
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn local_year_end_reaches_into_next_utc_year() {
        let start = datetime!(2018-11-01 0:00 -5);
        let end = datetime!(2018-12-31 23:59:59 -5);
        let periods = plan_periods(Family::Model, start, end, offset!(-5), 2024);
        assert_eq!(
            periods,
            vec![ShardPeriod::Year(2018), ShardPeriod::Year(2019)]
        );
    }

    #[test]
    fn east_of_greenwich_reaches_back_a_year() {
        let start = datetime!(2019-01-01 0:00 +9);
        let end = datetime!(2019-01-05 0:00 +9);
        let periods = plan_periods(Family::Model, start, end, offset!(+9), 2024);
        assert_eq!(
            periods,
            vec![ShardPeriod::Year(2018), ShardPeriod::Year(2019)]
        );
    }

    #[test]
    fn coverage_floor_differs_per_family() {
        let start = datetime!(2010-06-01 0:00 UTC);
        let end = datetime!(2016-02-01 0:00 UTC);
        let model = plan_periods(Family::Model, start, end, UtcOffset::UTC, 2024);
        let radar = plan_periods(Family::Radar, start, end, UtcOffset::UTC, 2024);
        assert_eq!(model.first(), Some(&ShardPeriod::Year(2010)));
        assert_eq!(model.len(), 7);
        assert_eq!(
            radar,
            vec![ShardPeriod::Year(2015), ShardPeriod::Year(2016)]
        );
    }

    #[test]
    fn present_year_adds_current_shard() {
        let start = datetime!(2023-12-01 0:00 UTC);
        let end = datetime!(2026-03-01 0:00 UTC);
        let periods = plan_periods(Family::Radar, start, end, UtcOffset::UTC, 2024);
        assert_eq!(
            periods,
            vec![
                ShardPeriod::Year(2023),
                ShardPeriod::Year(2024),
                ShardPeriod::Current
            ]
        );
    }

    #[test]
    fn windows_before_coverage_plan_nothing() {
        let start = datetime!(2001-01-01 0:00 UTC);
        let end = datetime!(2003-01-01 0:00 UTC);
        assert!(plan_periods(Family::Model, start, end, UtcOffset::UTC, 2024).is_empty());
    }
}

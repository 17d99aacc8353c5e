use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::{Family, Prediction, Window};

/// Position of an hour within a year, which is all climatology is keyed by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CalendarHour {
    pub month: Month,
    pub day: u8,
    pub hour: u8,
}

impl CalendarHour {
    pub fn of(at: OffsetDateTime) -> Self {
        let utc = at.to_offset(UtcOffset::UTC);
        Self {
            month: utc.month(),
            day: utc.day(),
            hour: utc.hour(),
        }
    }

    /// The same calendar hour in `year`, or `None` for Feb 29 in a common year.
    pub fn on_year(&self, year: i32) -> Option<OffsetDateTime> {
        let date = Date::from_calendar_date(year, self.month, self.day).ok()?;
        let time = Time::from_hms(self.hour, 0, 0).ok()?;
        Some(PrimitiveDateTime::new(date, time).assume_utc())
    }
}

/// Part of a target's window and the shard family that serves it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment {
    Live(Window),
    Climatology(Window),
}

/// Whether planning needs the newest live timestamp.
pub fn needs_live_extent(prediction: Prediction) -> bool {
    prediction == Prediction::Predicted
}

/// Split a window between live shards and climatology.
///
/// In predicted mode the series switches to climatology at the first hour
/// after the newest live row. Otherwise the hours before the coverage floor
/// and the hours after `now` come from climatology and the rest from live
/// shards.
pub fn plan_segments(
    prediction: Prediction,
    window: Window,
    live_max: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> Vec<Segment> {
    match prediction {
        Prediction::LiveOnly => vec![Segment::Live(window)],
        Prediction::Auto => {
            let floor = Family::Model.coverage_start().midnight().assume_utc();
            let mut segments = vec![];
            if window.start < floor {
                segments.push(Segment::Climatology(Window {
                    start: window.start,
                    end: window.end.min(floor - Duration::seconds(1)),
                }));
            }
            let live = Window {
                start: window.start.max(floor),
                end: window.end.min(now),
            };
            if live.start <= live.end {
                segments.push(Segment::Live(live));
            }
            if window.end > now {
                segments.push(Segment::Climatology(Window {
                    start: window.start.max(now + Duration::seconds(1)),
                    end: window.end,
                }));
            }
            segments
        }
        Prediction::Predicted => {
            let Some(live_max) = live_max else {
                return vec![Segment::Climatology(window)];
            };
            let mut segments = vec![];
            if window.start <= live_max {
                segments.push(Segment::Live(Window {
                    start: window.start,
                    end: window.end.min(live_max),
                }));
            }
            if window.end > live_max {
                segments.push(Segment::Climatology(Window {
                    start: window.start.max(live_max + Duration::hours(1)),
                    end: window.end,
                }));
            }
            segments
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn window(start: OffsetDateTime, end: OffsetDateTime) -> Window {
        Window { start, end }
    }

    #[test]
    fn calendar_hour_round_trips() {
        let at = datetime!(2024-07-04 10:00 UTC);
        let position = CalendarHour::of(at);
        let climatology_year = position.on_year(2001).unwrap();
        assert_eq!(CalendarHour::of(climatology_year), position);
        assert_eq!(CalendarHour::of(climatology_year).on_year(2024), Some(at));
        assert_eq!(
            (position.month, position.day, position.hour),
            (Month::July, 4, 10)
        );
    }

    #[test]
    fn leap_day_has_no_common_year_position() {
        let leap = CalendarHour::of(datetime!(2024-02-29 6:00 UTC));
        assert_eq!(leap.on_year(2023), None);
        assert!(leap.on_year(2028).is_some());
    }

    #[test]
    fn predicted_mode_switches_after_newest_live_hour() {
        let live_max = datetime!(2024-07-04 10:00 UTC);
        let segments = plan_segments(
            Prediction::Predicted,
            window(datetime!(2024-07-01 0:00 UTC), datetime!(2024-07-10 0:00 UTC)),
            Some(live_max),
            datetime!(2024-07-04 12:00 UTC),
        );
        assert_eq!(
            segments,
            vec![
                Segment::Live(window(datetime!(2024-07-01 0:00 UTC), live_max)),
                Segment::Climatology(window(
                    datetime!(2024-07-04 11:00 UTC),
                    datetime!(2024-07-10 0:00 UTC)
                )),
            ]
        );
    }

    #[test]
    fn predicted_mode_without_live_rows_is_all_climatology() {
        let w = window(datetime!(2024-07-01 0:00 UTC), datetime!(2024-07-02 0:00 UTC));
        assert_eq!(
            plan_segments(Prediction::Predicted, w, None, datetime!(2024-07-01 0:00 UTC)),
            vec![Segment::Climatology(w)]
        );
    }

    #[test]
    fn auto_mode_uses_climatology_only_outside_coverage() {
        let now = datetime!(2024-07-01 0:00 UTC);
        let future = window(datetime!(2024-08-01 0:00 UTC), datetime!(2024-08-02 0:00 UTC));
        let past = window(datetime!(2019-08-01 0:00 UTC), datetime!(2024-06-02 0:00 UTC));
        let ancient = window(datetime!(1990-01-01 0:00 UTC), datetime!(1990-02-01 0:00 UTC));
        assert_eq!(
            plan_segments(Prediction::Auto, future, None, now),
            vec![Segment::Climatology(future)]
        );
        assert_eq!(
            plan_segments(Prediction::Auto, past, None, now),
            vec![Segment::Live(past)]
        );
        assert_eq!(
            plan_segments(Prediction::Auto, ancient, None, now),
            vec![Segment::Climatology(ancient)]
        );
        assert_eq!(
            plan_segments(Prediction::LiveOnly, future, None, now),
            vec![Segment::Live(future)]
        );
    }

    #[test]
    fn auto_mode_splits_windows_straddling_now() {
        let now = datetime!(2024-06-01 12:00 UTC);
        let w = window(datetime!(2024-05-31 12:00 UTC), datetime!(2024-06-08 12:00 UTC));
        assert_eq!(
            plan_segments(Prediction::Auto, w, None, now),
            vec![
                Segment::Live(window(datetime!(2024-05-31 12:00 UTC), now)),
                Segment::Climatology(window(
                    datetime!(2024-06-01 12:00:01 UTC),
                    datetime!(2024-06-08 12:00 UTC)
                )),
            ]
        );
    }

    #[test]
    fn auto_mode_splits_windows_straddling_the_coverage_floor() {
        let now = datetime!(2024-06-01 12:00 UTC);
        let w = window(datetime!(2004-12-31 0:00 UTC), datetime!(2005-01-02 0:00 UTC));
        assert_eq!(
            plan_segments(Prediction::Auto, w, None, now),
            vec![
                Segment::Climatology(window(
                    datetime!(2004-12-31 0:00 UTC),
                    datetime!(2004-12-31 23:59:59 UTC)
                )),
                Segment::Live(window(
                    datetime!(2005-01-01 0:00 UTC),
                    datetime!(2005-01-02 0:00 UTC)
                )),
            ]
        );
    }
}
